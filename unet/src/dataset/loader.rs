use ahash::AHashMap;
use candle_core::{Device, Tensor};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use super::{load_image, load_mask, DatasetError, SampleShape, SamplePair};

// Holds x items in the channel per worker
const CHANNEL_BUFFER_MULTIPLIER: usize = 2;

type WorkItem = (usize, Vec<SamplePair>);
type BatchResult = (usize, Result<Batch, DatasetError>);

/// A decoded batch: images as `[N, C, H, W]` floats and masks as `[N, H, W]` labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub images: Vec<f32>,
    pub masks: Vec<u32>,
    pub len: usize,
    pub shape: SampleShape,
}

impl Batch {
    pub fn to_tensors(&self, device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
        let s = self.shape;
        let x = Tensor::from_slice(
            &self.images,
            (self.len, s.channels, s.height, s.width),
            device,
        )?;
        let y = Tensor::from_slice(&self.masks, (self.len, s.height, s.width), device)?;
        Ok((x, y))
    }
}

/// Multi-threaded loader that decodes image/mask pairs from disk.
///
/// Workers pull chunks of samples, decode them and send the batches back
/// through a bounded channel. Batches are yielded in sample order regardless
/// of which worker finished first.
pub struct DataLoader {
    receiver: Option<mpsc::Receiver<BatchResult>>,
    workers: Vec<thread::JoinHandle<()>>,
    pending: AHashMap<usize, Result<Batch, DatasetError>>,
    next_index: usize,
    num_batches: usize,
}

impl DataLoader {
    pub fn new(
        samples: &[SamplePair],
        shape: SampleShape,
        batch_size: usize,
        num_workers: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let num_workers = num_workers.max(1);

        let (sender, receiver) = mpsc::sync_channel(num_workers * CHANNEL_BUFFER_MULTIPLIER);

        let (work_sender, work_receiver) =
            mpsc::sync_channel::<WorkItem>(num_workers * CHANNEL_BUFFER_MULTIPLIER);
        let work_receiver = Arc::new(Mutex::new(work_receiver));

        let workers = Self::spawn_workers(num_workers, work_receiver, sender, shape);

        let chunks: Vec<Vec<SamplePair>> = samples.chunks(batch_size).map(|c| c.to_vec()).collect();
        let num_batches = chunks.len();

        // Distribute batches to workers
        thread::spawn(move || {
            for item in chunks.into_iter().enumerate() {
                if work_sender.send(item).is_err() {
                    break;
                }
            }
        });

        Self {
            receiver: Some(receiver),
            workers,
            pending: AHashMap::new(),
            next_index: 0,
            num_batches,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    fn spawn_workers(
        num_workers: usize,
        work_receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
        sender: mpsc::SyncSender<BatchResult>,
        shape: SampleShape,
    ) -> Vec<thread::JoinHandle<()>> {
        (0..num_workers)
            .map(|_| {
                let rx = Arc::clone(&work_receiver);
                let tx = sender.clone();

                thread::spawn(move || loop {
                    let (index, pairs) = {
                        match rx.lock().unwrap_or_else(PoisonError::into_inner).recv() {
                            Ok(item) => item,
                            Err(_) => break,
                        }
                    };

                    let batch = Self::process_batch(index, &pairs, shape);
                    if let Err(e) = &batch {
                        log::debug!("Failed to load batch {}: {}", index, e);
                    }

                    if tx.send((index, batch)).is_err() {
                        break;
                    }
                })
            })
            .collect()
    }

    fn process_batch(
        index: usize,
        pairs: &[SamplePair],
        shape: SampleShape,
    ) -> Result<Batch, DatasetError> {
        let mut images = Vec::with_capacity(pairs.len() * shape.channels * shape.pixels());
        let mut masks = Vec::with_capacity(pairs.len() * shape.pixels());

        for pair in pairs {
            images.extend(load_image(&pair.image, &shape)?);
            masks.extend(load_mask(&pair.mask, &shape)?);
        }

        Ok(Batch {
            index,
            images,
            masks,
            len: pairs.len(),
            shape,
        })
    }
}

impl Iterator for DataLoader {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.num_batches {
            return None;
        }

        let receiver = self.receiver.as_ref()?;
        while !self.pending.contains_key(&self.next_index) {
            let (index, batch) = receiver.recv().ok()?;
            self.pending.insert(index, batch);
        }

        let batch = self.pending.remove(&self.next_index);
        self.next_index += 1;
        batch
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_batches - self.next_index;
        (remaining, Some(remaining))
    }
}

impl Drop for DataLoader {
    fn drop(&mut self) {
        // Workers blocked on a full channel exit once the receiver is gone
        drop(self.receiver.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, shape};
    use super::super::PhantomDataset;
    use super::*;

    fn dataset(dir: &tempfile::TempDir) -> PhantomDataset {
        PhantomDataset::new(&dir.path().join("phantom"), &dir.path().join("mask"), shape()).unwrap()
    }

    #[test]
    fn test_batches_arrive_in_order() {
        let dir = fixture(7);
        let dataset = dataset(&dir);

        let loader = dataset.loader(2, 3);
        assert_eq!(loader.num_batches(), 4);

        let batches: Vec<Batch> = loader.map(|b| b.unwrap()).collect();
        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        let lens: Vec<usize> = batches.iter().map(|b| b.len).collect();

        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(lens, vec![2, 2, 2, 1]);
        // Sample 3 carries label 3 on even pixels
        let plane = shape().pixels();
        assert_eq!(batches[1].masks[plane], 3);
    }

    #[test]
    fn test_batch_tensors_have_expected_shapes() {
        let dir = fixture(3);
        let dataset = dataset(&dir);

        let batch = dataset.loader(3, 1).next().unwrap().unwrap();
        let (x, y) = batch.to_tensors(&Device::Cpu).unwrap();

        assert_eq!(x.dims(), &[3, 1, 4, 6]);
        assert_eq!(y.dims(), &[3, 4, 6]);
        assert_eq!(y.dtype(), candle_core::DType::U32);
    }

    #[test]
    fn test_dropping_undrained_loader_returns() {
        let dir = fixture(12);
        let dataset = dataset(&dir);

        let mut loader = dataset.loader(1, 2);
        assert!(loader.next().is_some());
        drop(loader);
    }

    #[test]
    fn test_shuffled_loader_covers_every_sample() {
        use rand::SeedableRng;

        let dir = fixture(5);
        let mut dataset = dataset(&dir);
        let mut rng = rand::rngs::StdRng::seed_from_u64(19);

        let total: usize = dataset
            .shuffled_loader(2, 2, &mut rng)
            .map(|b| b.unwrap().len)
            .sum();
        assert_eq!(total, 5);
    }
}
