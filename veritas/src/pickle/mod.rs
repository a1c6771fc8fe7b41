mod error;
mod machine;
mod opcode;
mod value;
mod writer;

pub use error::PickleError;
pub use machine::{PersistentLoad, PickleMachine, load};
pub use opcode::OpCode;
pub use value::{DictItems, GlobalRef, ListItems, Value};
pub use writer::PickleWriter;
