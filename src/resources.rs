//! Host resource checks used to throttle background uploads.

use std::time::Duration;

use tokio::task::JoinHandle;

/// `MemAvailable` from `/proc/meminfo`, in MiB. `None` where the file does
/// not exist or cannot be parsed.
pub fn available_memory_mb() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&content)
}

fn parse_mem_available(content: &str) -> Option<u64> {
    let line = content.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kb: u64 = line
        .trim_start_matches("MemAvailable:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb / 1024)
}

/// Admission control for background jobs.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundThrottle {
    pub max_jobs: usize,
    pub min_free_memory_mb: u64,
    pub poll: Duration,
    pub free_memory: fn() -> Option<u64>,
}

impl BackgroundThrottle {
    pub fn new(max_jobs: usize, min_free_memory_mb: u64) -> Self {
        Self {
            max_jobs: max_jobs.max(1),
            min_free_memory_mb,
            poll: Duration::from_secs(1),
            free_memory: available_memory_mb,
        }
    }

    fn memory_low(&self) -> bool {
        if self.min_free_memory_mb == 0 {
            return false;
        }
        match (self.free_memory)() {
            Some(mb) => mb < self.min_free_memory_mb,
            None => false,
        }
    }

    /// Block until another job may start.
    ///
    /// Waits while `max_jobs` or more are still running, or while memory is
    /// below the floor and at least one job is running. With nothing running
    /// there is nothing to wait for, so low memory alone never blocks.
    pub async fn wait_for_slot<T>(&self, jobs: &[JoinHandle<T>]) {
        let mut logged = false;
        loop {
            let running = jobs.iter().filter(|h| !h.is_finished()).count();
            let at_limit = running >= self.max_jobs;
            let low_memory = running > 0 && self.memory_low();
            if !at_limit && !low_memory {
                return;
            }
            if !logged {
                tracing::debug!(
                    running,
                    max = self.max_jobs,
                    low_memory,
                    "Waiting for a background upload slot"
                );
                logged = true;
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16314424 kB\n\
                           MemFree:         1234567 kB\n\
                           MemAvailable:    8388608 kB\n\
                           Buffers:          123456 kB\n";

    #[test]
    fn test_parse_mem_available() {
        assert_eq!(parse_mem_available(MEMINFO), Some(8192));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    fn throttle(max_jobs: usize, free_memory: fn() -> Option<u64>) -> BackgroundThrottle {
        BackgroundThrottle {
            max_jobs,
            min_free_memory_mb: 512,
            poll: Duration::from_millis(5),
            free_memory,
        }
    }

    #[tokio::test]
    async fn test_waits_for_running_job_to_finish() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let jobs = vec![tokio::spawn(async move {
            let _ = rx.await;
        })];
        let t = throttle(1, || Some(4096));

        let waiter = tokio::spawn(async move {
            t.wait_for_slot(&jobs).await;
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_low_memory_without_jobs_does_not_block() {
        let jobs: Vec<JoinHandle<()>> = Vec::new();
        let t = throttle(2, || Some(1));
        tokio::time::timeout(Duration::from_secs(1), t.wait_for_slot(&jobs))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_finished_jobs_free_slots() {
        let jobs = vec![tokio::spawn(async {})];
        tokio::time::sleep(Duration::from_millis(20)).await;
        let t = throttle(1, || None);
        tokio::time::timeout(Duration::from_secs(1), t.wait_for_slot(&jobs))
            .await
            .unwrap();
    }
}
