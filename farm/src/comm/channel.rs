//! In-process channel fabric: one mpsc channel per direction, FIFO per
//! worker, used by the local executor and the integration tests.

use super::{CommError, CoordinatorPort, WorkerPort};
use std::sync::mpsc::{channel, Receiver, Sender};

#[derive(Debug)]
pub struct ChannelCoordinator {
    to_workers: Vec<Sender<Vec<u8>>>,
    from_workers: Receiver<(usize, Vec<u8>)>,
}

#[derive(Debug)]
pub struct ChannelWorker {
    id: usize,
    to_coordinator: Sender<(usize, Vec<u8>)>,
    from_coordinator: Receiver<Vec<u8>>,
}

/// Build a fabric connecting one coordinator with `workers` workers.
pub fn fabric(workers: usize) -> (ChannelCoordinator, Vec<ChannelWorker>) {
    let (to_coordinator, from_workers) = channel();

    let mut to_workers = Vec::with_capacity(workers);
    let mut ports = Vec::with_capacity(workers);

    for id in 0..workers {
        let (sender, receiver) = channel();
        to_workers.push(sender);
        ports.push(ChannelWorker {
            id,
            to_coordinator: to_coordinator.clone(),
            from_coordinator: receiver,
        });
    }

    (
        ChannelCoordinator {
            to_workers,
            from_workers,
        },
        ports,
    )
}

impl CoordinatorPort for ChannelCoordinator {
    fn workers(&self) -> usize {
        self.to_workers.len()
    }

    fn send(&self, worker: usize, frame: Vec<u8>) -> Result<(), CommError> {
        self.to_workers[worker]
            .send(frame)
            .map_err(|_| CommError::Disconnected)
    }

    fn recv_any(&self) -> Result<(usize, Vec<u8>), CommError> {
        self.from_workers.recv().map_err(|_| CommError::Disconnected)
    }

    fn broadcast(&self, frame: Vec<u8>) -> Result<(), CommError> {
        for sender in self.to_workers.iter() {
            sender.send(frame.clone()).map_err(|_| CommError::Disconnected)?;
        }

        Ok(())
    }
}

impl WorkerPort for ChannelWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), CommError> {
        self.to_coordinator
            .send((self.id, frame))
            .map_err(|_| CommError::Disconnected)
    }

    fn recv(&self) -> Result<Vec<u8>, CommError> {
        self.from_coordinator.recv().map_err(|_| CommError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_is_fifo() {
        let (coordinator, workers) = fabric(2);

        coordinator.send(0, vec![1]).unwrap();
        coordinator.send(0, vec![2]).unwrap();
        coordinator.send(1, vec![3]).unwrap();

        assert_eq!(workers[0].recv().unwrap(), vec![1]);
        assert_eq!(workers[0].recv().unwrap(), vec![2]);
        assert_eq!(workers[1].recv().unwrap(), vec![3]);

        workers[1].send(vec![4]).unwrap();
        assert_eq!(coordinator.recv_any().unwrap(), (1, vec![4]));
    }

    #[test]
    fn broadcast_reaches_every_worker() {
        let (coordinator, workers) = fabric(3);

        coordinator.broadcast(vec![9, 9]).unwrap();
        for worker in workers.iter() {
            assert_eq!(worker.recv().unwrap(), vec![9, 9]);
        }
    }

    #[test]
    fn disconnect_is_reported() {
        let (coordinator, workers) = fabric(1);

        drop(workers);
        assert!(matches!(
            coordinator.recv_any(),
            Err(CommError::Disconnected)
        ));
    }
}
