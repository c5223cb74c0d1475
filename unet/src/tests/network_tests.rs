use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{ModuleT, VarBuilder, VarMap};

use crate::network::{layer_sizes, Network};

fn create_network(in_channels: usize, num_classes: usize) -> Result<(Network, VarMap)> {
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let network = Network::new(&vs, in_channels, num_classes, 4, 16)?;
    Ok((network, varmap))
}

#[test]
fn test_logits_match_input_size() -> Result<()> {
    let (network, _varmap) = create_network(1, 4)?;
    let x = Tensor::rand(0f32, 1.0, (2, 1, 16, 16), &Device::Cpu)?;

    let logits = network.forward_t(&x, true)?;
    assert_eq!(logits.dims(), &[2, 4, 16, 16]);
    Ok(())
}

#[test]
fn test_odd_sizes_are_restored() -> Result<()> {
    // 10 -> 5 -> 2 after pooling, the decoder pads back to the skip sizes
    let (network, _varmap) = create_network(3, 2)?;
    let x = Tensor::rand(0f32, 1.0, (1, 3, 16, 10), &Device::Cpu)?;

    let logits = network.forward_t(&x, false)?;
    assert_eq!(logits.dims(), &[1, 2, 16, 10]);
    Ok(())
}

#[test]
fn test_predict_returns_class_indices() -> Result<()> {
    let (network, _varmap) = create_network(1, 4)?;
    let x = Tensor::rand(0f32, 1.0, (2, 1, 8, 8), &Device::Cpu)?;

    let pred = network.predict(&x)?;
    assert_eq!(pred.dims(), &[2, 8, 8]);
    assert_eq!(pred.dtype(), DType::U32);

    let values = pred.flatten_all()?.to_vec1::<u32>()?;
    assert!(values.iter().all(|&v| v < 4));
    Ok(())
}

#[test]
fn test_variables_follow_layer_sizes() -> Result<()> {
    let (_network, varmap) = create_network(1, 4)?;
    let data = varmap.data().lock().unwrap();

    assert_eq!(layer_sizes(4, 16), vec![4, 8]);
    assert_eq!(data["downs.0.conv1.weight"].dims(), &[4, 1, 3, 3]);
    assert_eq!(data["downs.1.conv1.weight"].dims(), &[8, 4, 3, 3]);
    assert_eq!(data["bottleneck.conv1.weight"].dims(), &[16, 8, 3, 3]);
    assert_eq!(data["ups.0.conv.conv1.weight"].dims(), &[8, 16, 3, 3]);
    assert_eq!(data["head.weight"].dims(), &[4, 4, 1, 1]);
    assert!(data.contains_key("downs.0.bn1.running_mean"));
    Ok(())
}
