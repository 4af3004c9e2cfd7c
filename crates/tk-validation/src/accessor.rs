use tk_ndarray::Tensor;

use crate::reference::SimpleTensor;

/// Copies the logical shape of an allocated tensor, skipping padding.
pub fn read_tensor(tensor: &Tensor) -> Result<SimpleTensor, String> {
    let info = tensor.info();
    let values = tensor
        .export_values()
        .map_err(|err| format!("failed reading tensor {}: {err}", info.shape()))?;
    SimpleTensor::new(
        info.shape().clone(),
        info.data_type(),
        info.fractional_bits(),
        values,
    )
}

/// Writes `src` into the logical shape of an allocated tensor.
pub fn write_tensor(tensor: &mut Tensor, src: &SimpleTensor) -> Result<(), String> {
    if tensor.info().shape() != src.shape() {
        return Err(format!(
            "cannot write {} values into tensor of shape {}",
            src.shape(),
            tensor.info().shape()
        ));
    }
    tensor
        .import_values(src.values())
        .map_err(|err| format!("failed writing tensor {}: {err}", src.shape()))
}
