/// Decision taken by [`EarlyStopping::step`] for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    SaveCheckpoint,
    Stop,
}

/// Tracks the best validation loss and decides when to checkpoint or stop.
///
/// The policy never touches the filesystem; the caller performs the save
/// when [`Action::SaveCheckpoint`] is returned.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    best_loss: f32,
    counter: usize,
    patience: usize,
    wait: usize,
    early_stop: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, wait: usize) -> Self {
        Self {
            best_loss: f32::INFINITY,
            counter: 0,
            patience,
            wait,
            early_stop: false,
        }
    }

    pub fn step(&mut self, val_loss: f32, epoch: usize) -> Action {
        if self.early_stop {
            return Action::Stop;
        }

        // Warm-up epochs are observed only
        if epoch < self.wait {
            return Action::Continue;
        }

        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.counter = 0;
            return Action::SaveCheckpoint;
        }

        self.counter += 1;
        log::info!(
            "Early stopping counter: {} out of {}",
            self.counter,
            self.patience
        );

        if self.counter >= self.patience {
            self.early_stop = true;
            Action::Stop
        } else {
            Action::Continue
        }
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn early_stop(&self) -> bool {
        self.early_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_after_patience_non_improvements() {
        let mut stopping = EarlyStopping::new(2, 0);
        let losses = [1.0, 0.9, 0.95, 0.96, 0.97];

        let mut actions = Vec::new();
        let mut counters = Vec::new();
        for (epoch, &loss) in losses.iter().enumerate() {
            actions.push(stopping.step(loss, epoch));
            counters.push(stopping.counter());
        }

        assert_eq!(
            actions,
            vec![
                Action::SaveCheckpoint,
                Action::SaveCheckpoint,
                Action::Continue,
                Action::Stop,
                Action::Stop,
            ]
        );
        assert_eq!(&counters[..4], &[0, 0, 1, 2]);
        assert!(stopping.early_stop());
        assert_eq!(stopping.best_loss(), 0.9);
    }

    #[test]
    fn test_wait_epochs_do_not_change_state() {
        let mut stopping = EarlyStopping::new(1, 3);

        for (epoch, loss) in [(0, 5.0), (1, 0.1), (2, 9.0)] {
            assert_eq!(stopping.step(loss, epoch), Action::Continue);
            assert_eq!(stopping.counter(), 0);
            assert_eq!(stopping.best_loss(), f32::INFINITY);
            assert!(!stopping.early_stop());
        }

        assert_eq!(stopping.step(2.0, 3), Action::SaveCheckpoint);
        assert_eq!(stopping.best_loss(), 2.0);
        assert_eq!(stopping.step(2.5, 4), Action::Stop);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut stopping = EarlyStopping::new(3, 0);

        stopping.step(1.0, 0);
        stopping.step(1.1, 1);
        stopping.step(1.2, 2);
        assert_eq!(stopping.counter(), 2);

        assert_eq!(stopping.step(0.5, 3), Action::SaveCheckpoint);
        assert_eq!(stopping.counter(), 0);
        assert!(!stopping.early_stop());
    }

    #[test]
    fn test_equal_loss_is_not_an_improvement() {
        let mut stopping = EarlyStopping::new(5, 0);

        assert_eq!(stopping.step(1.0, 0), Action::SaveCheckpoint);
        assert_eq!(stopping.step(1.0, 1), Action::Continue);
        assert_eq!(stopping.counter(), 1);
    }

    #[test]
    fn test_zero_patience_stops_on_first_regression() {
        let mut stopping = EarlyStopping::new(0, 0);

        assert_eq!(stopping.step(1.0, 0), Action::SaveCheckpoint);
        assert_eq!(stopping.step(1.5, 1), Action::Stop);
    }
}
