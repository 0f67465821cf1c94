use crate::config::WebhookExporterConfig;
use crate::error::ExportError;
use crate::exporters::Exporter;
use crate::types::{Condition, Event};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Time `close` allows for draining the queue before dropping the rest
const CLOSE_GRACE: Duration = Duration::from_secs(5);
const DEADLINE_CHECK: Duration = Duration::from_millis(100);

/// JSON body POSTed to the webhook
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Conditions {
        node: String,
        conditions: Vec<Condition>,
    },
    Event {
        node: String,
        source: String,
        event: Event,
    },
}

/// Bounded FIFO of pending payloads
#[derive(Debug)]
struct DeliveryQueue {
    payloads: VecDeque<Payload>,
    max_size: usize,
    closed: bool,
    /// Set by `close`; payloads still queued past it are discarded
    deadline: Option<Instant>,
    dropped: u64,
}

impl DeliveryQueue {
    fn new(max_size: usize) -> Self {
        Self {
            payloads: VecDeque::new(),
            max_size: max_size.max(1),
            closed: false,
            deadline: None,
            dropped: 0,
        }
    }

    /// Enqueue, dropping the oldest payload when full
    fn push(&mut self, payload: Payload) {
        if self.payloads.len() >= self.max_size {
            if self.payloads.pop_front().is_some() {
                self.dropped += 1;
                warn!(
                    "Webhook queue full ({} payloads), dropped oldest ({} dropped so far)",
                    self.max_size, self.dropped
                );
            }
        }
        self.payloads.push_back(payload);
    }
}

type SharedQueue = Arc<(Mutex<DeliveryQueue>, Condvar)>;

fn lock(queue: &Mutex<DeliveryQueue>) -> MutexGuard<'_, DeliveryQueue> {
    queue.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exporter POSTing conditions and events as JSON
///
/// Export calls only enqueue; a dedicated thread drives `reqwest` on a
/// single-threaded tokio runtime. Failed deliveries are logged and not
/// retried.
pub struct WebhookExporter {
    node_name: String,
    queue: SharedQueue,
    worker: Option<JoinHandle<()>>,
    close_grace: Duration,
}

impl WebhookExporter {
    pub fn new(node_name: impl Into<String>, config: &WebhookExporterConfig) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExportError::SetupFailed("webhook".to_string(), e.to_string()))?;

        let queue: SharedQueue = Arc::new((
            Mutex::new(DeliveryQueue::new(config.queue_size)),
            Condvar::new(),
        ));

        let url = config.url.clone();
        let worker_queue = Arc::clone(&queue);
        let worker = thread::Builder::new()
            .name("webhook-exporter".to_string())
            .spawn(move || Self::delivery_thread(runtime, client, url, worker_queue))
            .map_err(|e| ExportError::SetupFailed("webhook".to_string(), e.to_string()))?;

        info!("Webhook exporter delivering to {}", config.url);
        Ok(Self {
            node_name: node_name.into(),
            queue,
            worker: Some(worker),
            close_grace: CLOSE_GRACE,
        })
    }

    fn delivery_thread(
        runtime: tokio::runtime::Runtime,
        client: reqwest::Client,
        url: String,
        queue: SharedQueue,
    ) {
        let (mutex, available) = &*queue;
        loop {
            let payload = {
                let mut guard = lock(mutex);
                loop {
                    if guard.deadline.is_some_and(|d| Instant::now() >= d)
                        && !guard.payloads.is_empty()
                    {
                        let discarded = guard.payloads.len();
                        guard.payloads.clear();
                        guard.dropped += discarded as u64;
                        warn!(
                            "Webhook exporter closing, dropped {} undelivered payload(s)",
                            discarded
                        );
                    }
                    if let Some(payload) = guard.payloads.pop_front() {
                        break Some(payload);
                    }
                    if guard.closed {
                        break None;
                    }
                    guard = available.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            };

            let Some(payload) = payload else {
                break;
            };

            match runtime.block_on(Self::deliver_until_closed(&client, &url, &payload, &queue)) {
                Ok(()) => debug!("Delivered webhook payload to {}", url),
                Err(e) => warn!("Webhook delivery failed: {}", e),
            }
        }
        debug!("Webhook delivery thread finished");
    }

    /// Deliver one payload, giving up once the close deadline has passed
    async fn deliver_until_closed(
        client: &reqwest::Client,
        url: &str,
        payload: &Payload,
        queue: &SharedQueue,
    ) -> Result<(), ExportError> {
        let delivery = Self::deliver(client, url, payload);
        tokio::pin!(delivery);
        loop {
            match tokio::time::timeout(DEADLINE_CHECK, &mut delivery).await {
                Ok(result) => return result,
                Err(_) => {
                    let mut guard = lock(&queue.0);
                    if guard.deadline.is_some_and(|d| Instant::now() >= d) {
                        guard.dropped += 1;
                        return Err(ExportError::DeliveryFailed(
                            url.to_string(),
                            "exporter closed before delivery finished".to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn deliver(client: &reqwest::Client, url: &str, payload: &Payload) -> Result<(), ExportError> {
        let response = client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::DeliveryFailed(
                url.to_string(),
                format!("HTTP {}", status),
            ));
        }
        Ok(())
    }

    fn enqueue(&self, payload: Payload) -> Result<(), ExportError> {
        let (mutex, available) = &*self.queue;
        let mut guard = lock(mutex);
        if guard.closed {
            return Err(ExportError::Closed(self.name().to_string()));
        }
        guard.push(payload);
        available.notify_one();
        Ok(())
    }

    /// Stop accepting payloads and join the worker
    ///
    /// Queued payloads get one shared grace period; whatever is left after it
    /// is dropped and counted.
    pub fn close(&mut self) {
        {
            let (mutex, available) = &*self.queue;
            let mut guard = lock(mutex);
            if !guard.closed {
                guard.closed = true;
                guard.deadline = Some(Instant::now() + self.close_grace);
            }
            available.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Webhook delivery thread panicked");
            }
        }
    }

    /// Number of payloads waiting for delivery
    pub fn pending(&self) -> usize {
        lock(&self.queue.0).payloads.len()
    }
}

impl Exporter for WebhookExporter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn export_conditions(&self, conditions: &[Condition]) -> Result<(), ExportError> {
        self.enqueue(Payload::Conditions {
            node: self.node_name.clone(),
            conditions: conditions.to_vec(),
        })
    }

    fn export_event(&self, source: &str, event: &Event) -> Result<(), ExportError> {
        self.enqueue(Payload::Event {
            node: self.node_name.clone(),
            source: source.to_string(),
            event: event.clone(),
        })
    }
}

impl Drop for WebhookExporter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConditionStatus, Severity};
    use chrono::{TimeZone, Utc};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn event(reason: &str) -> Event {
        Event {
            severity: Severity::Warn,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            reason: reason.to_string(),
            message: "Killed process 42".to_string(),
        }
    }

    fn event_payload(reason: &str) -> Payload {
        Payload::Event {
            node: "node-1".to_string(),
            source: "kernel-monitor".to_string(),
            event: event(reason),
        }
    }

    /// Accept `count` HTTP requests and hand their bodies to the test
    fn serve(count: usize) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/status", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for _ in 0..count {
                let (mut stream, _) = listener.accept().unwrap();
                let mut raw = Vec::new();
                let mut chunk = [0u8; 1024];
                let body = loop {
                    let n = stream.read(&mut chunk).unwrap();
                    raw.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&raw).to_string();
                    if let Some(split) = text.find("\r\n\r\n") {
                        let length = text[..split]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if raw.len() >= split + 4 + length {
                            break text[split + 4..split + 4 + length].to_string();
                        }
                    }
                    if n == 0 {
                        break String::new();
                    }
                };
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .unwrap();
                tx.send(body).unwrap();
            }
        });

        (url, rx)
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut queue = DeliveryQueue::new(2);
        queue.push(event_payload("first"));
        queue.push(event_payload("second"));
        queue.push(event_payload("third"));

        assert_eq!(queue.dropped, 1);
        assert_eq!(queue.payloads.len(), 2);
        assert_eq!(queue.payloads[0], event_payload("second"));
        assert_eq!(queue.payloads[1], event_payload("third"));
    }

    #[test]
    fn test_payload_json_shape() {
        let conditions = Payload::Conditions {
            node: "node-1".to_string(),
            conditions: vec![Condition {
                condition_type: "KernelDeadlock".to_string(),
                status: ConditionStatus::True,
                transition: Utc.timestamp_opt(0, 0).unwrap(),
                reason: "DockerHung".to_string(),
                message: "blocked".to_string(),
            }],
        };
        let json = serde_json::to_value(&conditions).unwrap();
        assert_eq!(json["node"], "node-1");
        assert_eq!(json["conditions"][0]["type"], "KernelDeadlock");
        assert_eq!(json["conditions"][0]["status"], "True");

        let json = serde_json::to_value(event_payload("OOMKilling")).unwrap();
        assert_eq!(json["source"], "kernel-monitor");
        assert_eq!(json["event"]["reason"], "OOMKilling");
        assert_eq!(json["event"]["severity"], "warn");
    }

    #[test]
    fn test_delivers_event_over_http() {
        let (url, bodies) = serve(1);
        let exporter = WebhookExporter::new("node-1", &WebhookExporterConfig::new(url)).unwrap();

        exporter.export_event("kernel-monitor", &event("OOMKilling")).unwrap();

        let body = bodies.recv_timeout(Duration::from_secs(10)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["node"], "node-1");
        assert_eq!(json["event"]["reason"], "OOMKilling");
    }

    #[test]
    fn test_unreachable_endpoint_does_not_block() {
        let config = WebhookExporterConfig {
            timeout_seconds: 1,
            ..WebhookExporterConfig::new("http://127.0.0.1:9/unreachable")
        };
        let exporter = WebhookExporter::new("node-1", &config).unwrap();
        for i in 0..10 {
            assert!(exporter.export_event("m", &event(&format!("r{}", i))).is_ok());
        }
        drop(exporter);
    }

    #[test]
    fn test_close_is_bounded_by_grace_period() {
        // Accepts connections at the kernel level but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = WebhookExporterConfig {
            timeout_seconds: 30,
            queue_size: 64,
            ..WebhookExporterConfig::new(format!("http://{}/", listener.local_addr().unwrap()))
        };
        let mut exporter = WebhookExporter::new("node-1", &config).unwrap();
        exporter.close_grace = Duration::from_millis(300);
        for i in 0..20 {
            exporter.export_event("m", &event(&format!("r{}", i))).unwrap();
        }

        let started = Instant::now();
        exporter.close();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(exporter.pending(), 0);
        assert!(lock(&exporter.queue.0).dropped > 0);
        drop(listener);
    }

    #[test]
    fn test_export_after_close_fails() {
        let mut exporter =
            WebhookExporter::new("node-1", &WebhookExporterConfig::new("http://127.0.0.1:9/")).unwrap();
        exporter.close();
        assert_eq!(exporter.pending(), 0);
        assert!(matches!(
            exporter.export_conditions(&[]),
            Err(ExportError::Closed(_))
        ));
    }
}
