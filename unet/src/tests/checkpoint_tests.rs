use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{ModuleT, VarBuilder, VarMap};
use std::collections::HashMap;

use crate::checkpoint::{self, named_vars, CheckpointError, CheckpointForm, StateDict};
use crate::network::Network;
use crate::optim::{OptimizerKind, TrainOptimizer};
use crate::scheduler::ReduceLrOnPlateau;
use crate::stopping::Action;

fn create_network(device: &Device) -> Result<(Network, VarMap)> {
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let network = Network::new(&vs, 1, 3, 4, 8)?;
    Ok((network, varmap))
}

fn train_once(network: &Network, optimizer: &mut TrainOptimizer, device: &Device) -> Result<()> {
    let x = Tensor::rand(0f32, 1.0, (2, 1, 8, 8), device)?;
    let loss = network.forward_t(&x, true)?.sqr()?.mean_all()?;
    optimizer.backward_step(&loss)
}

fn flatten(state: Vec<(String, Tensor)>) -> HashMap<String, Vec<f32>> {
    state
        .into_iter()
        .map(|(k, t)| {
            let values = t
                .to_dtype(DType::F32)
                .and_then(|t| t.flatten_all())
                .and_then(|t| t.to_vec1::<f32>())
                .unwrap();
            (k, values)
        })
        .collect()
}

fn model_values(varmap: &VarMap) -> HashMap<String, Vec<f32>> {
    flatten(
        named_vars(varmap)
            .into_iter()
            .map(|(k, v)| (k, v.as_tensor().clone()))
            .collect(),
    )
}

#[test]
fn test_bundle_round_trip_is_exact() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = checkpoint::best_checkpoint_path(dir.path(), "run");

    let (network, varmap) = create_network(&device)?;
    let mut optimizer = TrainOptimizer::from_varmap(OptimizerKind::Adam, &varmap, 1e-2)?;
    let mut scheduler = ReduceLrOnPlateau::new(1e-2);
    train_once(&network, &mut optimizer, &device)?;
    scheduler.step(0.75, optimizer.learning_rate());
    scheduler.step(0.80, optimizer.learning_rate());

    checkpoint::save(&path, &varmap, &optimizer, Some(&scheduler as &dyn StateDict))?;

    let (_restored_network, restored_varmap) = create_network(&device)?;
    let mut restored_optimizer =
        TrainOptimizer::from_varmap(OptimizerKind::Adam, &restored_varmap, 1.0)?;
    let mut restored_scheduler = ReduceLrOnPlateau::new(1.0);

    let form = checkpoint::load(
        &path,
        &restored_varmap,
        Some(&mut restored_optimizer as &mut dyn StateDict),
        Some(&mut restored_scheduler as &mut dyn StateDict),
    )?;

    assert_eq!(form, CheckpointForm::Bundle);
    assert_eq!(model_values(&restored_varmap), model_values(&varmap));
    assert_eq!(
        flatten(restored_optimizer.state_dict()?),
        flatten(optimizer.state_dict()?)
    );
    assert_eq!(restored_optimizer.learning_rate(), 1e-2);
    assert_eq!(restored_scheduler.best(), 0.75);
    assert_eq!(restored_scheduler.num_bad_epochs(), 1);
    Ok(())
}

#[test]
fn test_bare_model_state_loads() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("weights.safetensors");

    let (_network, varmap) = create_network(&device)?;
    varmap.save(&path)?;

    let (_restored_network, restored_varmap) = create_network(&device)?;
    let mut optimizer = TrainOptimizer::from_varmap(OptimizerKind::Sgd, &restored_varmap, 0.5)?;

    let form = checkpoint::load(
        &path,
        &restored_varmap,
        Some(&mut optimizer as &mut dyn StateDict),
        None,
    )?;

    assert_eq!(form, CheckpointForm::ModelOnly);
    assert_eq!(model_values(&restored_varmap), model_values(&varmap));
    assert_eq!(optimizer.learning_rate(), 0.5);
    Ok(())
}

#[test]
fn test_unrelated_file_is_rejected() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("other.safetensors");

    let mut tensors = HashMap::new();
    tensors.insert("model".to_string(), Tensor::zeros(3, DType::F32, &device)?);
    candle_core::safetensors::save(&tensors, &path)?;

    let (_network, varmap) = create_network(&device)?;
    let err = checkpoint::load(&path, &varmap, None, None).unwrap_err();

    assert!(matches!(err, CheckpointError::UnexpectedLayout(_)));
    assert!(err.to_string().contains("state_dict"));
    Ok(())
}

#[test]
fn test_missing_optimizer_state_names_key() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("partial.safetensors");

    let (_network, varmap) = create_network(&device)?;
    let optimizer = TrainOptimizer::from_varmap(OptimizerKind::Adam, &varmap, 1e-3)?;
    checkpoint::save(&path, &varmap, &optimizer, None)?;

    let mut scheduler = ReduceLrOnPlateau::new(1e-3);
    let err = checkpoint::load(&path, &varmap, None, Some(&mut scheduler as &mut dyn StateDict))
        .unwrap_err();

    assert!(matches!(err, CheckpointError::MissingKey(ref k) if k == "best"));
    Ok(())
}

#[test]
fn test_saving_twice_keeps_latest_state() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = checkpoint::best_checkpoint_path(dir.path(), "run");

    let (network, varmap) = create_network(&device)?;
    let mut optimizer = TrainOptimizer::from_varmap(OptimizerKind::Adam, &varmap, 1e-2)?;

    checkpoint::save(&path, &varmap, &optimizer, None)?;
    let first = model_values(&varmap);

    train_once(&network, &mut optimizer, &device)?;
    checkpoint::save(&path, &varmap, &optimizer, None)?;
    let second = model_values(&varmap);
    assert_ne!(first, second);

    let (_restored_network, restored_varmap) = create_network(&device)?;
    let mut restored_optimizer =
        TrainOptimizer::from_varmap(OptimizerKind::Adam, &restored_varmap, 1.0)?;
    checkpoint::load(
        &path,
        &restored_varmap,
        Some(&mut restored_optimizer as &mut dyn StateDict),
        None,
    )?;

    assert_eq!(model_values(&restored_varmap), second);
    assert_eq!(
        flatten(restored_optimizer.state_dict()?),
        flatten(optimizer.state_dict()?)
    );
    Ok(())
}

#[test]
fn test_actions_drive_best_checkpoint() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let best = checkpoint::best_checkpoint_path(&dir.path().join("checkpoints"), "run");

    let (network, varmap) = create_network(&device)?;
    let mut optimizer = TrainOptimizer::from_varmap(OptimizerKind::Sgd, &varmap, 1e-2)?;
    let scheduler = ReduceLrOnPlateau::new(1e-2);
    let scheduler = Some(&scheduler as &dyn StateDict);

    let stop = checkpoint::apply_action(Action::Continue, &best, &varmap, &optimizer, scheduler)?;
    assert!(!stop);
    assert!(!best.exists());

    let stop =
        checkpoint::apply_action(Action::SaveCheckpoint, &best, &varmap, &optimizer, scheduler)?;
    assert!(!stop);
    assert!(best.exists());

    train_once(&network, &mut optimizer, &device)?;
    let improved = model_values(&varmap);
    checkpoint::apply_action(Action::SaveCheckpoint, &best, &varmap, &optimizer, scheduler)?;

    // Stopping leaves the best checkpoint untouched
    train_once(&network, &mut optimizer, &device)?;
    let stop = checkpoint::apply_action(Action::Stop, &best, &varmap, &optimizer, scheduler)?;
    assert!(stop);

    let (_restored_network, restored_varmap) = create_network(&device)?;
    checkpoint::load(&best, &restored_varmap, None, None)?;
    assert_eq!(model_values(&restored_varmap), improved);
    Ok(())
}
