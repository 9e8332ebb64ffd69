use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::budget::{DeviceMemoryBudget, Reservation};
use crate::decoders::{DecodeSession, DecoderBackend, RawFrame, StreamInfo};
use crate::error::{Result, StreamError};
use crate::logging::{EventLog, DECODE_TARGET, POOL_TARGET};
use crate::types::{LogLevel, VideoKey};
use crate::{log_event, log_failure};

/// 每个解码上下文默认预留的帧缓冲数量
pub const DEFAULT_BUFFER_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// `cache_stream` 使用的设备
    pub device_id: u32,
    /// 每个上下文预留的帧缓冲数量，0 表示默认值
    pub buffer_depth: usize,
    /// 等待其他线程完成同一个源初始化的最长时间
    pub init_timeout: Option<Duration>,
    pub log_level: Option<LogLevel>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            init_timeout: None,
            log_level: None,
        }
    }
}

pub(crate) fn effective_depth(depth: usize) -> usize {
    if depth == 0 {
        DEFAULT_BUFFER_DEPTH
    } else {
        depth
    }
}

/// 最近解码的帧，最多保留 `depth` 帧，按解码先后淘汰
#[derive(Debug)]
struct FrameRing {
    depth: usize,
    frames: VecDeque<RawFrame>,
}

impl FrameRing {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            frames: VecDeque::with_capacity(depth),
        }
    }

    fn get(&self, index: u64) -> Option<&RawFrame> {
        self.frames.iter().find(|frame| frame.index == index)
    }

    fn push(&mut self, frame: &RawFrame) {
        if self.get(frame.index).is_some() {
            return;
        }
        if self.frames.len() == self.depth {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.clone());
    }
}

struct DecodeState {
    session: Box<dyn DecodeSession>,
    recent: FrameRing,
}

/// 一个打开的视频源：解码会话、帧缓冲和预留的设备显存
pub struct DecodeContext {
    key: VideoKey,
    device_id: u32,
    info: StreamInfo,
    state: Mutex<DecodeState>,
    refs: AtomicUsize,
    reservation: Reservation,
}

impl DecodeContext {
    /// 打开源并按 `frame_bytes × buffer_depth` 预留显存，预留失败时会话随之关闭
    pub fn open(
        backend: &dyn DecoderBackend,
        key: &VideoKey,
        device_id: u32,
        buffer_depth: usize,
        budget: &DeviceMemoryBudget,
    ) -> Result<Self> {
        let session = backend.open(key, device_id)?;
        let info = session.info().clone();
        let depth = effective_depth(buffer_depth);
        let bytes = info.frame_bytes() * depth as u64;
        let reservation = budget.reserve(key, device_id, bytes)?;
        Ok(Self {
            key: key.clone(),
            device_id,
            info,
            state: Mutex::new(DecodeState {
                session,
                recent: FrameRing::new(depth),
            }),
            refs: AtomicUsize::new(0),
            reservation,
        })
    }

    pub fn key(&self) -> &VideoKey {
        &self.key
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reservation.bytes()
    }

    /// 帧缓冲中当前保留的帧索引，按解码先后排列
    pub fn buffered_indices(&self) -> Vec<u64> {
        self.state
            .lock()
            .recent
            .frames
            .iter()
            .map(|frame| frame.index)
            .collect()
    }

    /// 按顺序解码 `batch`，期间独占会话
    ///
    /// 帧缓冲里已有的帧直接复用，不移动会话位置。没有游标时每一帧都回到
    /// 之前最近的关键帧；有游标且会话仍停在游标主人上次离开的位置、中间
    /// 没有关键帧时继续向前解码。两条路径输出的帧完全相同。
    pub(crate) fn decode_batch(
        &self,
        batch: &[u64],
        mut cursor: Option<&mut SeekCursor>,
        log: &EventLog,
    ) -> Result<Vec<RawFrame>> {
        let mut guard = self.state.lock();
        let DecodeState { session, recent } = &mut *guard;
        let mut frames = Vec::with_capacity(batch.len());

        for &index in batch {
            if let Some(frame) = recent.get(index) {
                log_event!(log, High, target: DECODE_TARGET, key = %self.key, index, "buffered frame reused");
                frames.push(frame.clone());
                continue;
            }

            let position = session.next_index();
            let can_continue = cursor.as_deref().is_some_and(|c| {
                c.next == Some(position)
                    && position <= index
                    && self.info.keyframe_at_or_before(index) <= position
            });

            if can_continue {
                log_event!(log, High, target: DECODE_TARGET, key = %self.key, index, from = position, "continue decoding");
            } else {
                let keyframe = session.seek_keyframe(index);
                let keyframe = self.track_failure(keyframe, cursor.as_deref_mut(), index, log)?;
                log_event!(log, High, target: DECODE_TARGET, key = %self.key, index, keyframe, "seek to keyframe");
            }

            let frame = loop {
                let decoded = session.decode_next();
                let frame = self.track_failure(decoded, cursor.as_deref_mut(), index, log)?;
                recent.push(&frame);
                if frame.index == index {
                    break frame;
                }
                if frame.index > index {
                    let overshoot = Err(StreamError::DecodeError {
                        key: self.key.clone(),
                        index,
                        reason: format!("decoder skipped past target (got frame {})", frame.index),
                    });
                    return self.track_failure(overshoot, cursor.as_deref_mut(), index, log);
                }
            };
            frames.push(frame);

            if let Some(c) = cursor.as_deref_mut() {
                c.next = Some(index + 1);
            }
        }

        Ok(frames)
    }

    fn track_failure<T>(
        &self,
        result: Result<T>,
        cursor: Option<&mut SeekCursor>,
        index: u64,
        log: &EventLog,
    ) -> Result<T> {
        result.inspect_err(|e| {
            if let Some(c) = cursor {
                c.next = None;
            }
            log_failure!(log, target: DECODE_TARGET, key = %self.key, index, error = %e, "decode failed");
        })
    }
}

/// 每个转换器自己的顺序读取位置，从不在转换器之间共享
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekCursor {
    next: Option<u64>,
}

impl SeekCursor {
    /// 下一次可以无需 seek 直接解码的帧
    pub fn next(&self) -> Option<u64> {
        self.next
    }

    pub fn clear(&mut self) {
        self.next = None;
    }
}

impl std::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("key", &self.key)
            .field("device_id", &self.device_id)
            .field("info", &self.info)
            .field("refs", &self.ref_count())
            .field("reserved_bytes", &self.reserved_bytes())
            .finish()
    }
}

enum SlotState {
    Initializing,
    Ready(Arc<DecodeContext>),
    Failed(StreamError),
}

struct Slot {
    device_id: u32,
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn initializing(device_id: u32) -> Self {
        Self {
            device_id,
            state: Mutex::new(SlotState::Initializing),
            ready: Condvar::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// 池的统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub entries: usize,
    pub sessions_opened: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub reserved_bytes: u64,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    backend: Arc<dyn DecoderBackend>,
    budget: DeviceMemoryBudget,
    entries: Mutex<HashMap<VideoKey, Arc<Slot>>>,
    closed: AtomicBool,
    counters: Counters,
    log: EventLog,
}

/// 解码上下文的共享缓存，克隆得到同一个池的另一个句柄
#[derive(Clone)]
pub struct StreamPool {
    shared: Arc<PoolShared>,
}

/// 非拥有的池引用，转换器用它绑定池
#[derive(Clone)]
pub(crate) struct WeakStreamPool(Weak<PoolShared>);

impl WeakStreamPool {
    pub(crate) fn upgrade(&self) -> Option<StreamPool> {
        self.0.upgrade().map(|shared| StreamPool { shared })
    }
}

impl StreamPool {
    pub fn new(backend: Arc<dyn DecoderBackend>) -> Self {
        Self::with_config(backend, PoolConfig::default(), DeviceMemoryBudget::unlimited())
    }

    pub fn with_config(
        backend: Arc<dyn DecoderBackend>,
        config: PoolConfig,
        budget: DeviceMemoryBudget,
    ) -> Self {
        let log = EventLog::new(config.log_level);
        Self {
            shared: Arc::new(PoolShared {
                config,
                backend,
                budget,
                entries: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                counters: Counters::default(),
                log,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakStreamPool {
        WeakStreamPool(Arc::downgrade(&self.shared))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn budget(&self) -> &DeviceMemoryBudget {
        &self.shared.budget
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// 在池的默认设备上缓存 `key`
    pub fn cache_stream(&self, key: impl Into<VideoKey>) -> Result<()> {
        self.cache_stream_on(key, self.shared.config.device_id)
    }

    /// 在 `device_id` 上缓存 `key`；已缓存在同一设备上时不做任何事，在其他设备上时返回 `DeviceMismatch`
    ///
    /// map 锁只在检查并插入时持有，打开源时已释放；同一个源的其他调用者等待该槽位，其他源不受影响。
    pub fn cache_stream_on(&self, key: impl Into<VideoKey>, device_id: u32) -> Result<()> {
        let key = key.into();
        let shared = &self.shared;

        let (slot, initializer) = {
            let mut entries = shared.entries.lock();
            if self.is_closed() {
                return Err(StreamError::PoolClosed { key });
            }
            match entries.get(&key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::initializing(device_id));
                    entries.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !initializer {
            if slot.device_id != device_id {
                return Err(StreamError::DeviceMismatch {
                    key,
                    cached: slot.device_id,
                    requested: device_id,
                });
            }
            shared.counters.hits.fetch_add(1, Ordering::SeqCst);
            log_event!(shared.log, Medium, target: POOL_TARGET, key = %key, device_id, "stream cache hit");
            return self.wait_ready(&slot, &key).map(|_| ());
        }

        shared.counters.misses.fetch_add(1, Ordering::SeqCst);
        log_event!(shared.log, Medium, target: POOL_TARGET, key = %key, device_id, "stream cache miss");

        let opened = DecodeContext::open(
            shared.backend.as_ref(),
            &key,
            device_id,
            shared.config.buffer_depth,
            &shared.budget,
        );

        match opened {
            Ok(context) => {
                shared.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
                log_event!(
                    shared.log,
                    Low,
                    target: POOL_TARGET,
                    key = %key,
                    device_id,
                    frames = context.info().frame_count,
                    bytes = context.reserved_bytes(),
                    "decode context created"
                );
                *slot.state.lock() = SlotState::Ready(Arc::new(context));
                slot.ready.notify_all();
                Ok(())
            }
            Err(err) => {
                log_failure!(shared.log, target: POOL_TARGET, key = %key, device_id, error = %err, "decode context creation failed");
                *slot.state.lock() = SlotState::Failed(err.clone());
                slot.ready.notify_all();
                let mut entries = shared.entries.lock();
                if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    entries.remove(&key);
                }
                Err(err)
            }
        }
    }

    fn wait_ready(&self, slot: &Slot, key: &VideoKey) -> Result<Arc<DecodeContext>> {
        let started = Instant::now();
        let deadline = self.shared.config.init_timeout.map(|t| started + t);
        let mut state = slot.state.lock();
        loop {
            match &*state {
                SlotState::Ready(context) => return Ok(Arc::clone(context)),
                SlotState::Failed(err) => return Err(err.clone()),
                SlotState::Initializing => match deadline {
                    Some(deadline) => {
                        if slot.ready.wait_until(&mut state, deadline).timed_out()
                            && matches!(*state, SlotState::Initializing)
                        {
                            return Err(StreamError::Timeout {
                                key: key.clone(),
                                device_id: slot.device_id,
                                waited: started.elapsed(),
                            });
                        }
                    }
                    None => slot.ready.wait(&mut state),
                },
            }
        }
    }

    /// 绑定已缓存的上下文；失败（`NotCached`、`DeviceMismatch`）时不改变引用计数
    pub fn acquire(&self, key: impl Into<VideoKey>, device_id: u32) -> Result<ContextLease> {
        let key = key.into();
        let shared = &self.shared;
        loop {
            let slot = {
                let entries = shared.entries.lock();
                if self.is_closed() {
                    return Err(StreamError::PoolClosed { key });
                }
                entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| StreamError::NotCached { key: key.clone() })?
            };

            if slot.device_id != device_id {
                return Err(StreamError::DeviceMismatch {
                    key,
                    cached: slot.device_id,
                    requested: device_id,
                });
            }

            let context = self.wait_ready(&slot, &key)?;

            // 计数必须在持有 map 锁时增加，和 evict 的检查互斥
            let entries = shared.entries.lock();
            match entries.get(&key) {
                Some(current) if Arc::ptr_eq(current, &slot) => {
                    let refs = context.refs.fetch_add(1, Ordering::SeqCst) + 1;
                    drop(entries);
                    log_event!(shared.log, Medium, target: POOL_TARGET, key = %key, device_id, refs, "context acquired");
                    return Ok(ContextLease {
                        context,
                        log: shared.log,
                    });
                }
                _ => continue,
            }
        }
    }

    /// 归还绑定，等同于丢弃租约
    pub fn release(&self, lease: ContextLease) {
        drop(lease);
    }

    /// 移除没有绑定的条目并关闭其解码会话
    pub fn evict(&self, key: impl Into<VideoKey>) -> Result<()> {
        let key = key.into();
        let shared = &self.shared;
        let removed = {
            let mut entries = shared.entries.lock();
            let slot = entries
                .get(&key)
                .ok_or_else(|| StreamError::NotCached { key: key.clone() })?;
            let context = match &*slot.state.lock() {
                SlotState::Ready(context) => Arc::clone(context),
                _ => return Err(StreamError::NotCached { key }),
            };
            let refs = context.ref_count();
            if refs > 0 {
                return Err(StreamError::StillReferenced { key, refs });
            }
            entries.remove(&key)
        };

        // 会话在锁外关闭
        drop(removed);
        shared.counters.evictions.fetch_add(1, Ordering::SeqCst);
        log_event!(shared.log, Low, target: POOL_TARGET, key = %key, "decode context evicted");
        Ok(())
    }

    /// 关闭整个池；仍有绑定时返回 `StillReferenced`，关闭后所有调用都返回 `PoolClosed`
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        let drained: Vec<Arc<Slot>> = {
            let mut entries = shared.entries.lock();
            for (key, slot) in entries.iter() {
                if let SlotState::Ready(context) = &*slot.state.lock() {
                    let refs = context.ref_count();
                    if refs > 0 {
                        return Err(StreamError::StillReferenced {
                            key: key.clone(),
                            refs,
                        });
                    }
                }
            }
            shared.closed.store(true, Ordering::SeqCst);
            entries.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        drop(drained);
        log_event!(shared.log, Low, target: POOL_TARGET, entries = count, "stream pool closed");
        Ok(())
    }

    pub fn contains(&self, key: impl Into<VideoKey>) -> bool {
        let key = key.into();
        self.ready_context(&key).is_some()
    }

    /// 当前绑定数；未缓存（或仍在初始化）时返回 `None`
    pub fn ref_count(&self, key: impl Into<VideoKey>) -> Option<usize> {
        let key = key.into();
        self.ready_context(&key).map(|context| context.ref_count())
    }

    pub fn device_of(&self, key: impl Into<VideoKey>) -> Option<u32> {
        let key = key.into();
        self.shared.entries.lock().get(&key).map(|slot| slot.device_id)
    }

    pub fn keys(&self) -> Vec<VideoKey> {
        let mut keys: Vec<VideoKey> = self.shared.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn ready_context(&self, key: &VideoKey) -> Option<Arc<DecodeContext>> {
        let entries = self.shared.entries.lock();
        let slot = entries.get(key)?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Ready(context) => Some(Arc::clone(context)),
            _ => None,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let (entries, reserved_bytes) = {
            let entries = shared.entries.lock();
            let reserved = entries
                .values()
                .filter_map(|slot| match &*slot.state.lock() {
                    SlotState::Ready(context) => Some(context.reserved_bytes()),
                    _ => None,
                })
                .sum();
            (entries.len(), reserved)
        };
        PoolStats {
            entries,
            sessions_opened: shared.counters.sessions_opened.load(Ordering::SeqCst),
            cache_hits: shared.counters.hits.load(Ordering::SeqCst),
            cache_misses: shared.counters.misses.load(Ordering::SeqCst),
            evictions: shared.counters.evictions.load(Ordering::SeqCst),
            reserved_bytes,
        }
    }
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("backend", &self.shared.backend.name())
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// 转换器对池化上下文的绑定，丢弃时释放，计数不会低于零
pub struct ContextLease {
    context: Arc<DecodeContext>,
    log: EventLog,
}

impl ContextLease {
    pub fn context(&self) -> &Arc<DecodeContext> {
        &self.context
    }

    pub fn key(&self) -> &VideoKey {
        self.context.key()
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let previous = self
            .context
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Ok(previous) = previous {
            log_event!(
                self.log,
                Medium,
                target: POOL_TARGET,
                key = %self.context.key(),
                refs = previous - 1,
                "context released"
            );
        }
    }
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("key", self.context.key())
            .field("device_id", &self.context.device_id())
            .finish()
    }
}
