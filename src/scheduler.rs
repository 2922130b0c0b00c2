use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::bitrate::Bitrate;
use crate::clock::{Clock, Timestamp};
use crate::data_source::{DataSource, DataSourceConfig, FrameSink};
use crate::dispatcher::DispatcherDelegate;
use crate::session::{CloseSource, Session, SessionEventListener};
use crate::transport::SendResult;

/// One inbound unreliable message: appended to the ledger once, never mutated, in arrival
///  order. The timestamp is taken at the moment of the notification - the transport's send
///  time is unknown to the receiver.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    pub payload: Bytes,
    pub receive_time: Timestamp,
}

/// Divides a pacing rate across sources by iterative water-filling: a source whose target
///  bitrate is below its equal share is capped at its target, and what it leaves over is
///  redistributed among the rest.
///
/// Each pass either caps at least one source or hands out final equal shares, so this
///  terminates after at most one pass per source. The allocations never sum to more than
///  `pacing_rate` (integer division rounds down).
pub(crate) fn divide_pacing_rate(pacing_rate: Bitrate, targets: &[Bitrate]) -> Vec<Bitrate> {
    let mut allocations = vec![Bitrate::ZERO; targets.len()];
    let mut pool = pacing_rate;
    let mut unsatisfied: Vec<usize> = (0..targets.len()).collect();

    while !unsatisfied.is_empty() {
        let share = pool / unsatisfied.len();
        let (capped, rest): (Vec<usize>, Vec<usize>) = unsatisfied.into_iter()
            .partition(|&i| targets[i] <= share);

        if capped.is_empty() {
            for i in rest {
                allocations[i] = share;
            }
            break;
        }
        for &i in &capped {
            allocations[i] = targets[i];
            pool = pool.saturating_sub(targets[i]);
        }
        unsatisfied = rest;
    }
    allocations
}

struct SchedulerInner {
    /// configs as validated at construction, with frame sizes already clamped to the
    ///  endpoint-wide payload limit
    configs: Vec<DataSourceConfig>,
    sources: Vec<Arc<DataSource>>,
    production_loops: Vec<JoinHandle<()>>,
    session: Option<Arc<dyn Session>>,
    received_messages: Vec<ReceivedMessage>,
}

/// Owns a set of independently configured data sources and multiplexes their output onto one
///  session's unreliable-message channel, continuously reshaping each source's frame size and
///  emission rate to the connection's observed bandwidth.
///
/// Wiring: register as the dispatcher's delegate (to learn about the session) and as the
///  session's event listener (writability, congestion updates, inbound messages); the sources
///  feed their frames back in through the [FrameSink] implementation.
pub struct SourceScheduler {
    clock: Arc<dyn Clock>,
    self_ref: Weak<SourceScheduler>,
    inner: Mutex<SchedulerInner>,
}

impl SourceScheduler {
    /// `max_datagram_payload` is the endpoint-wide payload limit ([crate::config::EndpointConfig]);
    ///  every source's maximum frame size is clamped to it here, and a source whose minimum
    ///  frame size does not fit under the clamped maximum is rejected now - a configuration
    ///  error before any I/O begins, not a runtime failure.
    pub fn new(mut configs: Vec<DataSourceConfig>, max_datagram_payload: usize, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<SourceScheduler>> {
        for config in &mut configs {
            config.max_frame_size = config.max_frame_size.min(max_datagram_payload);
            config.validate()?;
        }

        Ok(Arc::new_cyclic(|self_ref| SourceScheduler {
            clock,
            self_ref: self_ref.clone(),
            inner: Mutex::new(SchedulerInner {
                configs,
                sources: Vec::new(),
                production_loops: Vec::new(),
                session: None,
                received_messages: Vec::new(),
            }),
        }))
    }

    /// The message ledger: every inbound unreliable message in arrival order.
    pub async fn received_messages(&self) -> Vec<ReceivedMessage> {
        self.inner.lock().await
            .received_messages.clone()
    }

    pub async fn sources(&self) -> Vec<Arc<DataSource>> {
        self.inner.lock().await
            .sources.clone()
    }

    async fn set_sources_enabled(&self, enabled: bool) {
        let sources = self.sources().await;
        for source in sources {
            source.set_enabled(enabled).await;
        }
    }
}

#[async_trait]
impl DispatcherDelegate for SourceScheduler {
    /// Instantiates the sources against the freshly created session, shrinking each one's
    ///  maximum frame size to what the session guarantees to accept.
    async fn on_session_created(&self, session: Arc<dyn Session>) {
        // sources reference their sink weakly, so they can never keep this scheduler alive
        let sink: Weak<dyn FrameSink> = self.self_ref.clone();

        let payload_limit = session.max_datagram_payload();
        debug!("session created for {:?}, datagram payload limit {}", session.connection_id(), payload_limit);

        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            warn!("session already bound, ignoring additional session {:?}", session.connection_id());
            return;
        }

        for config in &inner.configs.clone() {
            let mut config = config.clone();
            config.max_frame_size = config.max_frame_size.min(payload_limit);
            if config.min_frame_size > config.max_frame_size {
                // lower bound wins: rather than corrupt frames into undersized slices, this
                //  source does not run against a session with such a small payload limit
                warn!("source {}: negotiated payload limit {} is below the minimum frame size {} - skipping source",
                    config.source_id, payload_limit, config.min_frame_size);
                continue;
            }

            match DataSource::new(config, self.clock.clone(), sink.clone()) {
                Ok(source) => {
                    inner.production_loops.push(source.spawn_production_loop());
                    inner.sources.push(source);
                }
                Err(e) => {
                    // cannot happen for configs that passed construction-time validation
                    warn!("skipping source with invalid config: {}", e);
                }
            }
        }

        inner.session = Some(session);
    }

    async fn on_connect_error(&self, code: u32, details: String) {
        warn!("connect error {}: {}", code, details);
    }
}

#[async_trait]
impl SessionEventListener for SourceScheduler {
    async fn on_handshake_complete(&self) {
        debug!("handshake complete");
    }

    /// The session can send: let every source attempt production on its own cadence.
    async fn on_session_writable(&self) {
        self.set_sources_enabled(true).await;
    }

    /// Reshapes every source's emission rate to the new pacing budget.
    async fn on_congestion_update(&self, bandwidth_estimate: Bitrate, pacing_rate: Bitrate, latest_rtt: Duration) {
        trace!("congestion update: estimate {:?}, pacing {:?}, rtt {:?}", bandwidth_estimate, pacing_rate, latest_rtt);

        let sources = self.sources().await;
        let targets: Vec<Bitrate> = sources.iter()
            .map(|s| s.target_bitrate())
            .collect();

        let allocations = divide_pacing_rate(pacing_rate, &targets);
        for (source, allocation) in sources.iter().zip(allocations) {
            source.set_allocated_bitrate(allocation).await;
        }
    }

    async fn on_incoming_stream(&self) {
        debug!("ignoring incoming stream - this peer exchanges unreliable messages only");
    }

    async fn on_message_received(&self, payload: Bytes) {
        let message = ReceivedMessage {
            payload,
            receive_time: self.clock.now(),
        };
        self.inner.lock().await
            .received_messages.push(message);
    }

    async fn on_session_closed(&self, code: u32, details: String, source: CloseSource) {
        debug!("session closed ({:?}, code {}): {}", source, code, details);
        self.set_sources_enabled(false).await;

        let mut inner = self.inner.lock().await;
        for handle in inner.production_loops.drain(..) {
            handle.abort();
        }
        inner.session = None;
    }
}

impl Drop for SourceScheduler {
    fn drop(&mut self) {
        // the loops hold their sources, not the scheduler; they still must not tick on after
        //  their owner is gone
        for handle in self.inner.get_mut().production_loops.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl FrameSink for SourceScheduler {
    /// Forwards each produced frame as one unreliable message, immediately. A rejected send is
    ///  not retried - the source's own cadence offers the next frame.
    async fn on_frame_produced(&self, source_id: u32, frame: Bytes) {
        let session = self.inner.lock().await.session.clone();
        let Some(session) = session else {
            trace!("source {}: no session bound, dropping frame", source_id);
            return;
        };

        match session.send_datagram(frame).await {
            SendResult::Accepted => trace!("source {}: datagram sent", source_id),
            SendResult::Rejected => debug!("source {}: session rejected the datagram - dropped, the next frame is the retry", source_id),
        }
    }
}
