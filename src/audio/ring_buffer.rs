//! Lock-free Single-Producer Single-Consumer Ring Buffer
//!
//! 设计目标：
//! - 零锁：占用计数是唯一的跨线程共享可变状态，单条原子 RMW 指令维护
//! - 零分配：所有内存在初始化时预分配
//! - 缓存友好：游标与计数各自独占一个 cache line（CachePadded）
//! - 内存锁定：可选 mlock 防止 page fault
//!
//! 写入方（Reader 线程）通过 `is_full()` 自行保证不写满；
//! 读取方（输出回调）永不阻塞：读到空缓冲区时记一次 underrun，
//! 返回读游标处的旧帧，游标与占用计数保持不动。

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// SPSC 无锁环形缓冲区
///
/// 写游标仅由生产者线程推进，读游标仅由消费者线程推进，
/// 二者永不触及同一槽位（写游标不会越过读游标），因此槽位数组无需加锁。
/// 占用计数使用 acquire/release 原子操作建立两侧的可见性。
pub struct RingBuffer<T: Copy + Default> {
    slots: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,

    /// 下一个待写槽位，仅生产者推进
    write_pos: CachePadded<AtomicUsize>,
    /// 最旧的已填充槽位，仅消费者推进
    read_pos: CachePadded<AtomicUsize>,
    /// 缓冲区内的帧数，始终处于 [0, capacity]
    occupancy: CachePadded<AtomicUsize>,

    /// 对空缓冲区的读取次数，单调递增
    underruns: AtomicU64,

    memory_locked: AtomicBool,
}

unsafe impl<T: Copy + Default + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Default + Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// 创建指定容量的 Ring Buffer
    ///
    /// capacity 必须是 2 的幂（索引回绕使用位掩码）。
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "capacity must be a power of two"
        );

        let slots: Vec<UnsafeCell<T>> = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            occupancy: CachePadded::new(AtomicUsize::new(0)),
            underruns: AtomicU64::new(0),
            memory_locked: AtomicBool::new(false),
        }
    }

    /// 写入一帧（仅生产者调用）
    ///
    /// 前置条件：缓冲区未满，由调用方通过 `is_full()` 保证。
    #[inline]
    pub fn write(&self, frame: T) {
        let pos = self.write_pos.load(Ordering::Relaxed);

        unsafe {
            *self.slots[pos].get() = frame;
        }

        self.write_pos.store((pos + 1) & self.mask, Ordering::Relaxed);

        let prev = self.occupancy.fetch_add(1, Ordering::Release);
        debug_assert!(prev < self.capacity, "write into full ring buffer");
    }

    /// 读取一帧（仅消费者调用）
    ///
    /// 永不阻塞。缓冲区为空时记一次 underrun 并返回读游标处的旧帧，
    /// 游标不推进，占用计数保持为 0。
    #[inline]
    pub fn read(&self) -> T {
        let pos = self.read_pos.load(Ordering::Relaxed);

        if self.occupancy.load(Ordering::Acquire) == 0 {
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return unsafe { *self.slots[pos].get() };
        }

        let frame = unsafe { *self.slots[pos].get() };

        self.read_pos.store((pos + 1) & self.mask, Ordering::Relaxed);
        self.occupancy.fetch_sub(1, Ordering::Release);

        frame
    }

    /// 容量（帧数）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前缓冲的帧数
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    /// 缓冲区是否已满
    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity
    }

    /// 累计 underrun 次数
    #[inline]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// 锁定缓冲区内存，防止被换页
    ///
    /// 实时路径上的 page fault 会造成严重的时序抖动，
    /// 锁定后槽位数组常驻物理内存。返回是否成功。
    #[cfg(unix)]
    pub fn lock_memory(&self) -> bool {
        if self.memory_locked.load(Ordering::Acquire) {
            return true;
        }

        let ptr = self.slots.as_ptr() as *const libc::c_void;
        let len = self.capacity * std::mem::size_of::<UnsafeCell<T>>();

        if unsafe { libc::mlock(ptr, len) } == 0 {
            self.memory_locked.store(true, Ordering::Release);
            log::debug!("Ring buffer memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock ring buffer memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    #[cfg(not(unix))]
    pub fn lock_memory(&self) -> bool {
        log::debug!("Memory locking not supported on this platform");
        false
    }

    /// 解锁缓冲区内存
    #[cfg(unix)]
    pub fn unlock_memory(&self) {
        if !self.memory_locked.load(Ordering::Acquire) {
            return;
        }

        let ptr = self.slots.as_ptr() as *const libc::c_void;
        let len = self.capacity * std::mem::size_of::<UnsafeCell<T>>();

        unsafe {
            libc::munlock(ptr, len);
        }

        self.memory_locked.store(false, Ordering::Release);
        log::debug!("Ring buffer memory unlocked");
    }

    #[cfg(not(unix))]
    pub fn unlock_memory(&self) {}
}

impl<T: Copy + Default> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_roundtrip() {
        let rb = RingBuffer::<i32>::new(16);

        for v in 1..=4 {
            rb.write(v);
        }
        assert_eq!(rb.occupancy(), 4);

        for v in 1..=4 {
            assert_eq!(rb.read(), v);
        }
        assert_eq!(rb.occupancy(), 0);
        assert_eq!(rb.underruns(), 0);
    }

    #[test]
    fn test_wraparound() {
        let rb = RingBuffer::<i32>::new(4);

        for v in 1..=4 {
            rb.write(v);
        }
        assert!(rb.is_full());

        assert_eq!(rb.read(), 1);
        assert_eq!(rb.read(), 2);

        // 写游标回绕到数组头部
        rb.write(5);
        rb.write(6);
        assert!(rb.is_full());

        for v in 3..=6 {
            assert_eq!(rb.read(), v);
        }
    }

    #[test]
    fn test_underrun_returns_stale_frame() {
        let rb = RingBuffer::<i32>::new(4);

        rb.write(7);
        assert_eq!(rb.read(), 7);

        // 空读：underrun 计数 +1，游标停留在下一槽位（旧值 0），占用保持 0
        assert_eq!(rb.read(), 0);
        assert_eq!(rb.underruns(), 1);
        assert_eq!(rb.occupancy(), 0);

        assert_eq!(rb.read(), 0);
        assert_eq!(rb.underruns(), 2);
        assert_eq!(rb.occupancy(), 0);

        // 空读不推进游标：补一帧后读到的是新帧
        rb.write(9);
        assert_eq!(rb.read(), 9);
        assert_eq!(rb.underruns(), 2);
    }

    #[test]
    fn test_queries_are_pure() {
        let rb = RingBuffer::<i32>::new(8);
        rb.write(1);

        for _ in 0..10 {
            assert_eq!(rb.capacity(), 8);
            assert_eq!(rb.occupancy(), 1);
            assert!(!rb.is_full());
        }
        assert_eq!(rb.read(), 1);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two_capacity() {
        let _ = RingBuffer::<i32>::new(100);
    }

    #[test]
    fn test_spsc_ordering_across_threads() {
        use std::sync::Arc;
        use std::thread;

        const N: i32 = 10_000;

        let rb = Arc::new(RingBuffer::<i32>::new(64));
        let producer_rb = Arc::clone(&rb);

        let producer = thread::spawn(move || {
            for v in 0..N {
                while producer_rb.is_full() {
                    thread::yield_now();
                }
                producer_rb.write(v);
            }
        });

        // 只在有数据时读取，验证 FIFO 顺序和占用计数边界
        for expected in 0..N {
            while rb.occupancy() == 0 {
                thread::yield_now();
            }
            assert_eq!(rb.read(), expected);
            assert!(rb.occupancy() <= rb.capacity());
        }

        producer.join().unwrap();
        assert_eq!(rb.underruns(), 0);
    }
}
