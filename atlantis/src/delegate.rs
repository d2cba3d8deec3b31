use std::sync::Arc;

use atlantis_capture::TrafficPackage;
use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{debug, warn};

const DELEGATE_QUEUE_SIZE: usize = 1024;

/// In-process observer of captured traffic.
pub trait AtlantisDelegate: Send + Sync {
    fn on_package_captured(&self, package: &TrafficPackage);
}

/// Delivers every callback on one dedicated thread, whichever lane produced it.
#[derive(Debug)]
pub(crate) struct DelegateLane {
    sender: Sender<TrafficPackage>,
}

impl DelegateLane {
    pub(crate) fn spawn(delegate: Arc<dyn AtlantisDelegate>) -> Self {
        let (sender, receiver) = bounded::<TrafficPackage>(DELEGATE_QUEUE_SIZE);
        std::thread::spawn(move || {
            while let Ok(package) = receiver.recv() {
                delegate.on_package_captured(&package);
            }
            debug!("delegate lane stopped");
        });
        Self { sender }
    }

    pub(crate) fn deliver(&self, package: TrafficPackage) {
        match self.sender.try_send(package) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("delegate queue is full, dropping package"),
            Err(TrySendError::Disconnected(_)) => debug!("delegate lane is closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread::ThreadId;
    use std::time::Duration;

    use atlantis_capture::{PackageId, PackageType, Request, TrafficPackage};

    use super::{AtlantisDelegate, DelegateLane};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, ThreadId)>>,
    }

    impl AtlantisDelegate for Recorder {
        fn on_package_captured(&self, package: &TrafficPackage) {
            self.seen
                .lock()
                .unwrap()
                .push((package.id().to_string(), std::thread::current().id()));
        }
    }

    fn package(id: &str) -> TrafficPackage {
        TrafficPackage::new(
            PackageId::from(id),
            Request::new("https://example.com", "GET", Vec::new()),
            PackageType::Http,
        )
    }

    #[test]
    fn callbacks_arrive_in_order_on_one_thread() {
        let recorder = Arc::new(Recorder::default());
        let lane = DelegateLane::spawn(recorder.clone());
        let producers: Vec<_> = (0..3)
            .map(|n| {
                let sender = lane.sender.clone();
                std::thread::spawn(move || sender.send(package(&format!("p{n}"))).unwrap())
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        lane.deliver(package("last"));

        for _ in 0..200 {
            if recorder.seen.lock().unwrap().len() == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3].0, "last");
        assert!(seen.iter().all(|(_, thread)| *thread == seen[0].1));
        assert_ne!(seen[0].1, std::thread::current().id());
    }
}
