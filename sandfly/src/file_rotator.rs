// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Rotator (C2)
//!
//! Owns one recorder file per parallel output index, rotating to a new
//! file on a size threshold without stalling the producer (spec §4.2).
//! Two background tasks cooperate: the on-deck worker keeps one prepared
//! file ready, and the switch worker performs the near-instant pointer
//! swap when the current file fills.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::entities::{FileHeader, Record, StreamShape};
use sandfly_domain::services::RecordContainer;
use sandfly_domain::value_objects::RotatorStage;
use sandfly_domain::{FileInfo, SandflyError};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const ON_DECK_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DRAIN_ATTEMPTS: u32 = 10;
const DRAIN_INTERVAL: Duration = Duration::from_millis(500);

/// Builds a fresh [`RecordContainer`] for the given filename. Supplied once
/// at construction, analogous to `PipelineFacade`'s `NodeBuilder`.
pub type ContainerFactory = Arc<dyn Fn(&str) -> Arc<dyn RecordContainer> + Send + Sync>;

struct Slot {
    filename: String,
    header: FileHeader,
    container: Arc<dyn RecordContainer>,
}

struct State {
    stage: RotatorStage,
    counter: u64,
    size_estimate_mb: f64,
    base: String,
    ext: String,
    current: Option<Slot>,
    on_deck: Option<Slot>,
    to_finish: Option<Slot>,
}

/// Owns the write path for one parallel output file index (spec §3 "File
/// Rotator state").
pub struct FileRotator {
    index: usize,
    max_size_mb: f64,
    build_container: ContainerFactory,
    info: Mutex<FileInfo>,
    state: Mutex<State>,
    ok_to_write: Arc<AtomicBool>,
    do_switch: Arc<AtomicBool>,
    tearing_down: Arc<AtomicBool>,
    active_writers: Arc<AtomicUsize>,
    writer_released: Arc<Notify>,
    switch_requested: Arc<Notify>,
    on_deck_requested: Arc<Notify>,
    cancel: Arc<CancelSource>,
}

impl FileRotator {
    pub fn new(index: usize, max_size_mb: f64, build_container: ContainerFactory, cancel: Arc<CancelSource>) -> Arc<Self> {
        let info = FileInfo::new(FileInfo::default_filename(index), "");
        Arc::new(Self {
            index,
            max_size_mb,
            build_container,
            info: Mutex::new(info),
            state: Mutex::new(State {
                stage: RotatorStage::Initialized,
                counter: 0,
                size_estimate_mb: 0.0,
                base: String::new(),
                ext: String::new(),
                current: None,
                on_deck: None,
                to_finish: None,
            }),
            ok_to_write: Arc::new(AtomicBool::new(false)),
            do_switch: Arc::new(AtomicBool::new(false)),
            tearing_down: Arc::new(AtomicBool::new(false)),
            active_writers: Arc::new(AtomicUsize::new(0)),
            writer_released: Arc::new(Notify::new()),
            switch_requested: Arc::new(Notify::new()),
            on_deck_requested: Arc::new(Notify::new()),
            cancel,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Overrides this file index's output filename ahead of `start_files`
    /// (spec §6 "File names"). Rejected while the rotator is preparing or
    /// writing; take effect on the next `start_files` call.
    pub async fn set_filename(&self, name: impl Into<String>) -> Result<(), SandflyError> {
        self.guard_between_runs("set_filename").await?;
        self.info.lock().await.filename = name.into();
        Ok(())
    }

    pub async fn filename(&self) -> String {
        self.info.lock().await.filename.clone()
    }

    /// Overrides this file index's header description ahead of
    /// `start_files`; an empty override falls back to the description
    /// passed to `start_files` itself.
    pub async fn set_description(&self, description: impl Into<String>) -> Result<(), SandflyError> {
        self.guard_between_runs("set_description").await?;
        self.info.lock().await.description = description.into();
        Ok(())
    }

    pub async fn description(&self) -> String {
        self.info.lock().await.description.clone()
    }

    async fn guard_between_runs(&self, action: &str) -> Result<(), SandflyError> {
        let stage = self.state.lock().await.stage;
        if matches!(stage, RotatorStage::Preparing | RotatorStage::Writing) {
            return Err(SandflyError::state(format!("{stage:?}"), action));
        }
        Ok(())
    }

    /// Opens the first file, writes its header, and spawns the on-deck and
    /// switch background workers (spec §4.2 "Rotation protocol").
    pub async fn start_files(self: &Arc<Self>, description: &str, run_duration_ms: u64, streams: Vec<StreamShape>) -> Result<(), SandflyError> {
        let info = self.info.lock().await.clone();
        let (base, ext) = split_stem(&info.filename);
        let filename = info.filename.clone();
        let header_description = if info.description.is_empty() { description.to_string() } else { info.description.clone() };
        let header = FileHeader::new(filename.clone(), header_description, run_duration_ms, streams);

        let mut state = self.state.lock().await;
        state.stage = RotatorStage::Preparing;
        state.base = base;
        state.ext = ext;
        state.counter = 0;
        let container = (self.build_container)(&filename);
        container.open(&header).await?;
        state.current = Some(Slot { filename, header, container });
        state.stage = RotatorStage::Writing;
        drop(state);

        self.ok_to_write.store(true, Ordering::Release);
        self.tearing_down.store(false, Ordering::Release);

        self.spawn_on_deck_worker();
        self.spawn_switch_worker();
        Ok(())
    }

    fn spawn_on_deck_worker(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let cancel_token = this.cancel.token();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(ON_DECK_POLL_INTERVAL) => {}
                    _ = this.on_deck_requested.notified() => {}
                    _ = cancel_token.cancelled() => return,
                }
                if this.tearing_down.load(Ordering::Acquire) {
                    return;
                }
                this.ensure_on_deck().await;
                this.finalize_stale_to_finish().await;
            }
        });
    }

    fn spawn_switch_worker(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let cancel_token = this.cancel.token();
            loop {
                tokio::select! {
                    _ = this.switch_requested.notified() => {}
                    _ = cancel_token.cancelled() => return,
                }
                if this.tearing_down.load(Ordering::Acquire) {
                    return;
                }
                if let Err(err) = this.perform_switch().await {
                    error!(index = this.index, error = %err, "file switch failed");
                    this.cancel.cancel(1);
                    return;
                }
            }
        });
    }

    /// Creates `on_deck` synchronously if it is missing and the rotator is
    /// still writing (spec §4.2 step 1).
    async fn ensure_on_deck(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.on_deck.is_some() || state.stage != RotatorStage::Writing {
            return;
        }
        if let Some(current) = &state.current {
            state.counter += 1;
            let filename = format!("{}_{}{}", state.base, state.counter, state.ext);
            let header = current.header.continuation_of(filename.clone());
            let container = (self.build_container)(&filename);
            match container.open(&header).await {
                Ok(()) => state.on_deck = Some(Slot { filename, header, container }),
                Err(err) => warn!(index = self.index, error = %err, "failed to prepare on-deck file"),
            }
        }
    }

    async fn finalize_stale_to_finish(self: &Arc<Self>) {
        let slot = {
            let mut state = self.state.lock().await;
            state.to_finish.take()
        };
        if let Some(slot) = slot {
            if let Err(err) = slot.container.close().await {
                warn!(index = self.index, filename = %slot.filename, error = %err, "failed to finalize to-finish file");
            }
        }
    }

    /// Called on each record write; accumulates the size estimate and
    /// triggers a switch once `max_size_mb` is reached (spec §4.2 step 2).
    async fn record_file_contribution(self: &Arc<Self>, record_size_mb: f64) {
        let mut state = self.state.lock().await;
        state.size_estimate_mb += record_size_mb;
        if state.size_estimate_mb >= self.max_size_mb {
            drop(state);
            self.do_switch.store(true, Ordering::Release);
            self.ok_to_write.store(false, Ordering::Release);
            self.switch_requested.notify_one();
        }
    }

    /// Holding the file mutex: finalizes stale `to_finish`, creates
    /// `on_deck` synchronously if missing, swaps `current`/`on_deck`/
    /// `to_finish`, resets the estimate, and re-opens the gate
    /// (spec §4.2 step 3).
    async fn perform_switch(self: &Arc<Self>) -> Result<(), SandflyError> {
        let mut state = self.state.lock().await;

        if let Some(stale) = state.to_finish.take() {
            stale.container.close().await?;
        }

        if state.on_deck.is_none() {
            if let Some(current) = &state.current {
                state.counter += 1;
                let filename = format!("{}_{}{}", state.base, state.counter, state.ext);
                let header = current.header.continuation_of(filename.clone());
                let container = (self.build_container)(&filename);
                container.open(&header).await?;
                state.on_deck = Some(Slot { filename, header, container });
            }
        }

        let finished_current = state.current.take();
        state.current = state.on_deck.take();
        state.to_finish = finished_current;
        state.size_estimate_mb = 0.0;
        drop(state);

        self.do_switch.store(false, Ordering::Release);
        self.ok_to_write.store(true, Ordering::Release);
        self.on_deck_requested.notify_one();
        info!(index = self.index, "rotated to next file");
        Ok(())
    }

    /// Blocks (polling on a 100 ms timeout) until the gate is open, then
    /// appends through the current file's container (spec §4.2 "Writer
    /// contract").
    pub async fn write_record(self: &Arc<Self>, stream_index: usize, record: &Record) -> Result<(), SandflyError> {
        loop {
            if self.tearing_down.load(Ordering::Acquire) {
                return Err(SandflyError::resource(format!("file rotator {} is tearing down", self.index)));
            }
            if self.ok_to_write.load(Ordering::Acquire) {
                break;
            }
            let cancel_token = self.cancel.token();
            tokio::select! {
                _ = tokio::time::sleep(WRITE_POLL_INTERVAL) => {}
                _ = cancel_token.cancelled() => return Err(SandflyError::resource("cancelled while waiting to write")),
            }
        }

        let record_size_mb = record.size_mb();
        {
            let state = self.state.lock().await;
            let current = state.current.as_ref().ok_or_else(|| SandflyError::resource("no current file to write to"))?;
            current.container.append(stream_index, record).await?;
        }
        self.record_file_contribution(record_size_mb).await;
        Ok(())
    }

    /// Registers a writer against this file index; the returned guard
    /// decrements the active-writer count on drop so `finish_file` can
    /// drain them (spec §4.2 "Writer registration").
    pub fn register_writer(self: &Arc<Self>) -> WriterGuard {
        self.active_writers.fetch_add(1, Ordering::SeqCst);
        WriterGuard { counter: self.active_writers.clone(), notify: self.writer_released.clone() }
    }

    /// Drains remaining to-finish work, waits for writers to release,
    /// escalating to a global cancel on timeout, then finalizes the
    /// current file (spec §4.2 "Shutdown").
    pub async fn finish_file(self: &Arc<Self>) -> Result<(), SandflyError> {
        self.tearing_down.store(true, Ordering::Release);
        self.ok_to_write.store(false, Ordering::Release);

        if !self.drain_writers(DRAIN_ATTEMPTS).await {
            warn!(index = self.index, "writers did not release in time, escalating to global cancel");
            self.cancel.cancel(1);
            if !self.drain_writers(DRAIN_ATTEMPTS).await {
                return Err(SandflyError::RotatorStuck(format!("file rotator {} has writers that never released", self.index)));
            }
        }

        let mut state = self.state.lock().await;
        if let Some(to_finish) = state.to_finish.take() {
            to_finish.container.close().await?;
        }
        if let Some(on_deck) = state.on_deck.take() {
            on_deck.container.close().await?;
        }
        if let Some(current) = state.current.take() {
            current.container.close().await?;
        }
        state.stage = RotatorStage::Finished;
        Ok(())
    }

    async fn drain_writers(&self, attempts: u32) -> bool {
        for _ in 0..attempts {
            if self.active_writers.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::select! {
                _ = self.writer_released.notified() => {}
                _ = tokio::time::sleep(DRAIN_INTERVAL) => {}
            }
        }
        self.active_writers.load(Ordering::SeqCst) == 0
    }

    pub async fn stage(&self) -> RotatorStage {
        self.state.lock().await.stage
    }
}

/// Decrements the rotator's active-writer count on drop.
pub struct WriterGuard {
    counter: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Owns the full set of parallel [`FileRotator`]s for a run (spec §6's
/// `daq.n-files`).
pub struct RotatorHouse {
    rotators: Vec<Arc<FileRotator>>,
}

impl RotatorHouse {
    pub fn new(n_files: usize, max_size_mb: f64, build_container: ContainerFactory, cancel: Arc<CancelSource>) -> Self {
        let rotators = (0..n_files).map(|index| FileRotator::new(index, max_size_mb, build_container.clone(), cancel.clone())).collect();
        Self { rotators }
    }

    /// Bounds-checked lookup; an out-of-range index is a configuration
    /// error rather than a panic (spec §9 open question, tightened).
    pub fn rotator(&self, index: usize) -> Result<Arc<FileRotator>, SandflyError> {
        self.rotators.get(index).cloned().ok_or_else(|| SandflyError::config(format!("file index {index} out of range (n-files = {})", self.rotators.len())))
    }

    pub fn len(&self) -> usize {
        self.rotators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotators.is_empty()
    }

    /// Overrides file index `k`'s output filename ahead of `start_all`
    /// (spec §6 "File names"); the house's guarded setter delegates to the
    /// rotator, which rejects the change once it is preparing or writing.
    pub async fn set_filename(&self, index: usize, name: impl Into<String>) -> Result<(), SandflyError> {
        self.rotator(index)?.set_filename(name).await
    }

    pub async fn get_filename(&self, index: usize) -> Result<String, SandflyError> {
        Ok(self.rotator(index)?.filename().await)
    }

    pub async fn set_description(&self, index: usize, description: impl Into<String>) -> Result<(), SandflyError> {
        self.rotator(index)?.set_description(description).await
    }

    pub async fn get_description(&self, index: usize) -> Result<String, SandflyError> {
        Ok(self.rotator(index)?.description().await)
    }

    pub async fn start_all(&self, description: &str, run_duration_ms: u64, streams: Vec<StreamShape>) -> Result<(), SandflyError> {
        for rotator in &self.rotators {
            rotator.start_files(description, run_duration_ms, streams.clone()).await?;
        }
        Ok(())
    }

    pub async fn finish_all(&self) -> Result<(), SandflyError> {
        for rotator in &self.rotators {
            rotator.finish_file().await?;
        }
        Ok(())
    }
}

fn split_stem(filename: &str) -> (String, String) {
    match filename.rfind('.') {
        Some(idx) => (filename[..idx].to_string(), filename[idx..].to_string()),
        None => (filename.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeContainer {
        opened: StdMutex<bool>,
        appended: StdMutex<u32>,
        closed: StdMutex<bool>,
    }

    #[async_trait]
    impl RecordContainer for FakeContainer {
        async fn open(&self, _header: &FileHeader) -> Result<(), SandflyError> {
            *self.opened.lock().unwrap() = true;
            Ok(())
        }
        async fn append(&self, _stream_index: usize, _record: &Record) -> Result<(), SandflyError> {
            *self.appended.lock().unwrap() += 1;
            Ok(())
        }
        async fn close(&self) -> Result<(), SandflyError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn fake_factory() -> ContainerFactory {
        Arc::new(|_name: &str| Arc::new(FakeContainer::default()) as Arc<dyn RecordContainer>)
    }

    fn shape() -> StreamShape {
        StreamShape { channel_count: 1, record_size: 16, data_type_size: 4, data_format: "int".into(), bit_depth: 32 }
    }

    #[tokio::test]
    async fn start_then_write_succeeds() {
        let cancel = Arc::new(CancelSource::default());
        let rotator = FileRotator::new(0, 500.0, fake_factory(), cancel);
        rotator.start_files("run", 0, vec![shape()]).await.unwrap();
        assert_eq!(rotator.stage().await, RotatorStage::Writing);
        let record = Record::new(1, 0, vec![0u8; 16], true);
        rotator.write_record(0, &record).await.unwrap();
    }

    #[tokio::test]
    async fn rotation_triggers_on_size_threshold() {
        let cancel = Arc::new(CancelSource::default());
        let rotator = FileRotator::new(0, 0.00001, fake_factory(), cancel);
        rotator.start_files("run", 0, vec![shape()]).await.unwrap();
        let record = Record::new(1, 0, vec![0u8; 1024], true);
        rotator.write_record(0, &record).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rotator.ok_to_write.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn finish_file_drains_writers_then_finalizes() {
        let cancel = Arc::new(CancelSource::default());
        let rotator = FileRotator::new(0, 500.0, fake_factory(), cancel);
        rotator.start_files("run", 0, vec![shape()]).await.unwrap();
        let guard = rotator.register_writer();
        drop(guard);
        rotator.finish_file().await.unwrap();
        assert_eq!(rotator.stage().await, RotatorStage::Finished);
    }

    #[tokio::test]
    async fn house_rejects_out_of_range_index() {
        let cancel = Arc::new(CancelSource::default());
        let house = RotatorHouse::new(2, 500.0, fake_factory(), cancel);
        assert!(house.rotator(5).is_err());
        assert!(house.rotator(1).is_ok());
    }

    #[tokio::test]
    async fn set_filename_overrides_default_before_start() {
        let cancel = Arc::new(CancelSource::default());
        let house = RotatorHouse::new(1, 500.0, fake_factory(), cancel);
        assert_eq!(house.get_filename(0).await.unwrap(), "sandfly_out_0.egg");

        house.set_filename(0, "custom.egg").await.unwrap();
        assert_eq!(house.get_filename(0).await.unwrap(), "custom.egg");

        house.start_all("run", 0, vec![shape()]).await.unwrap();
        let rotator = house.rotator(0).unwrap();
        let record = Record::new(1, 0, vec![0u8; 16], true);
        rotator.write_record(0, &record).await.unwrap();
    }

    #[tokio::test]
    async fn set_filename_rejected_once_writing() {
        let cancel = Arc::new(CancelSource::default());
        let rotator = FileRotator::new(0, 500.0, fake_factory(), cancel);
        rotator.start_files("run", 0, vec![shape()]).await.unwrap();
        assert!(rotator.set_filename("too-late.egg").await.is_err());
    }

    #[tokio::test]
    async fn description_override_falls_back_when_empty() {
        let cancel = Arc::new(CancelSource::default());
        let rotator = FileRotator::new(0, 500.0, fake_factory(), cancel);
        rotator.set_description("custom run notes").await.unwrap();
        rotator.start_files("run", 0, vec![shape()]).await.unwrap();
        assert_eq!(rotator.stage().await, RotatorStage::Writing);
    }
}
