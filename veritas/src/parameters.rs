use indexmap::IndexMap;

use crate::Tensor;

/// Parameter name to tensor, in the order the checkpoint listed them.
pub type ParameterMap = IndexMap<String, Tensor>;

pub fn total_size_in_bytes(parameters: &ParameterMap) -> usize {
    parameters.values().map(Tensor::size_in_bytes).sum()
}

pub fn total_num_elements(parameters: &ParameterMap) -> usize {
    parameters.values().map(Tensor::num_elements).sum()
}
