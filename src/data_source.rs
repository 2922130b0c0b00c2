use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use rand::RngCore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::trace;

use crate::bitrate::Bitrate;
use crate::clock::{Clock, Timestamp};
use crate::frame::DataFrameHeader;

/// Static description of one data producer. Mutable only until the owning scheduler starts
///  producing; the scheduler may shrink (never grow) `max_frame_size` to fit the connection's
///  negotiated maximum datagram payload.
#[derive(Clone, Debug)]
pub struct DataSourceConfig {
    pub source_id: u32,

    /// how often the source offers a frame when enabled
    pub frame_interval: Duration,

    /// Frames are never smaller than this, even if the allocated rate would imply fewer bytes
    ///  per interval - a starved source sends rarely-but-whole rather than meaningless slices.
    pub min_frame_size: usize,

    pub max_frame_size: usize,

    /// the rate this source wants; the scheduler allocates at most this much
    pub target_bitrate: Bitrate,
}

impl DataSourceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.frame_interval.is_zero() {
            bail!("source {}: frame interval must be non-zero", self.source_id);
        }
        if self.min_frame_size < DataFrameHeader::SERIALIZED_LEN {
            bail!("source {}: minimum frame size {} cannot fit the frame header ({} bytes)",
                self.source_id, self.min_frame_size, DataFrameHeader::SERIALIZED_LEN);
        }
        if self.min_frame_size > self.max_frame_size {
            bail!("source {}: minimum frame size {} exceeds maximum frame size {}",
                self.source_id, self.min_frame_size, self.max_frame_size);
        }
        Ok(())
    }
}

/// Receives every frame a source produces, immediately on production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    async fn on_frame_produced(&self, source_id: u32, frame: Bytes);
}

struct DataSourceInner {
    sequence: u64,
    allocated_bitrate: Bitrate,
    enabled: bool,
    last_production_time: Timestamp,
}

/// One continuously-producing data source: emits frames of filler data on its configured
///  cadence, sized to its currently allocated bitrate.
///
/// Frame size tracks real elapsed time (`allocated_bitrate × time since the last frame`,
///  clamped to the configured bounds), so a source that fell behind produces a proportionally
///  larger frame instead of silently losing throughput.
pub struct DataSource {
    config: DataSourceConfig,
    clock: Arc<dyn Clock>,
    /// held weakly: the sink typically owns the source, and a frame produced after the sink is
    ///  gone is simply discarded
    sink: Weak<dyn FrameSink>,
    inner: Mutex<DataSourceInner>,
}

impl DataSource {
    /// Fails with a configuration error if the config is unsatisfiable - before any frame is
    ///  produced, not at runtime.
    pub fn new(config: DataSourceConfig, clock: Arc<dyn Clock>, sink: Weak<dyn FrameSink>) -> anyhow::Result<Arc<DataSource>> {
        config.validate()?;

        Ok(Arc::new(DataSource {
            inner: Mutex::new(DataSourceInner {
                sequence: 0,
                allocated_bitrate: config.target_bitrate,
                enabled: false,
                last_production_time: Timestamp::ZERO,
            }),
            config,
            clock,
            sink,
        }))
    }

    pub fn source_id(&self) -> u32 {
        self.config.source_id
    }

    pub fn target_bitrate(&self) -> Bitrate {
        self.config.target_bitrate
    }

    pub fn max_frame_size(&self) -> usize {
        self.config.max_frame_size
    }

    pub async fn allocated_bitrate(&self) -> Bitrate {
        self.inner.lock().await.allocated_bitrate
    }

    /// Sets the emission rate this source may currently use. Takes effect with the next frame.
    pub async fn set_allocated_bitrate(&self, bitrate: Bitrate) {
        self.inner.lock().await.allocated_bitrate = bitrate;
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.enabled
    }

    /// Enabling resets the production clock: a source that sat disabled for a while must not
    ///  burst a huge catch-up frame.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if enabled && !inner.enabled {
            inner.last_production_time = self.clock.now();
        }
        inner.enabled = enabled;
    }

    /// Produces one frame and hands it to the sink. A disabled source, or one whose sink is
    ///  gone, produces nothing.
    pub async fn produce_frame(&self) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };

        let frame = {
            let mut inner = self.inner.lock().await;
            if !inner.enabled {
                return;
            }

            let now = self.clock.now();
            let mut period = now - inner.last_production_time;
            if period.is_zero() {
                period = self.config.frame_interval;
            }

            let frame_size = inner.allocated_bitrate
                .bytes_for_period(period)
                .clamp(self.config.min_frame_size, self.config.max_frame_size);

            let mut buf = BytesMut::with_capacity(frame_size);
            DataFrameHeader {
                source_id: self.config.source_id,
                sequence: inner.sequence,
                send_time: now,
            }.ser(&mut buf);

            let mut filler = vec![0u8; frame_size - DataFrameHeader::SERIALIZED_LEN];
            rand::rng().fill_bytes(&mut filler);
            buf.put_slice(&filler);

            inner.sequence += 1;
            inner.last_production_time = now;
            buf.freeze()
        };

        trace!("source {}: produced frame of {} bytes", self.config.source_id, frame.len());
        sink.on_frame_produced(self.config.source_id, frame).await;
    }

    /// Spawns the cadence loop: one production attempt per frame interval, starting one
    ///  interval from now. The loop runs until the handle is aborted or dropped by the owner.
    pub fn spawn_production_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + source.config.frame_interval, source.config.frame_interval);
            loop {
                ticker.tick().await;
                source.produce_frame().await;
            }
        })
    }
}
