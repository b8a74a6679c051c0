// TLB（Translation Lookaside Buffer）缓存实现
//
// 以 (页基地址, 流ID, ASID, VMID) 为键的有界转换缓存，包括：
// - LRU 淘汰策略（哈希表 + 访问顺序队列）
// - 多页面大小探测查找
// - 按 ASID/VMID/流ID/虚拟地址的失效谓词
//
// 所有操作串行执行，不暴露中间状态。

use log::trace;
use smmu_core::{
    AccessPermission, Asid, MemoryType, PageSize, PhysicalAddress, StreamId, TranslationStage,
    VirtualAddress, Vmid,
};
use std::collections::{HashMap, VecDeque};

/// 查找与按地址失效时尝试的页面大小（从大到小）
///
/// 插入方按具体页面大小存键，探测序覆盖所有可能的基地址。
const PROBE_SIZES: [PageSize; 4] = [
    PageSize::Size1GB,
    PageSize::Size2MB,
    PageSize::Size64KB,
    PageSize::Size4KB,
];

/// TLB 条目
///
/// 缓存一次成功转换的叶信息；同一键在缓存中至多一条。
#[derive(Debug, Clone)]
pub struct TlbEntry {
    /// 虚拟地址（插入时的原始地址）
    pub va: VirtualAddress,
    /// 物理地址
    pub pa: PhysicalAddress,
    /// 流ID
    pub stream_id: StreamId,
    /// 地址空间ID
    pub asid: Asid,
    /// 虚拟机ID
    pub vmid: Vmid,
    /// 页面大小（决定缓存键的基地址）
    pub page_size: PageSize,
    /// 内存类型
    pub memory_type: MemoryType,
    /// 访问权限
    pub permission: AccessPermission,
    /// 是否可缓存
    pub cacheable: bool,
    /// 是否可共享
    pub shareable: bool,
    /// 产生叶映射的转换阶段
    pub stage: TranslationStage,
    /// 插入时间戳（单调递增）
    pub timestamp: u64,
}

/// TLB 缓存键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TlbKey {
    /// 页面基地址
    va_base: VirtualAddress,
    /// 流ID
    stream_id: StreamId,
    /// 地址空间ID
    asid: Asid,
    /// 虚拟机ID
    vmid: Vmid,
}

/// TLB 缓存
///
/// 哈希表提供查找，访问顺序队列维护 LRU 次序
/// （最近使用的在队尾，淘汰从队首取）。
pub struct TlbCache {
    /// TLB 条目
    entries: HashMap<TlbKey, TlbEntry>,
    /// LRU 访问顺序
    lru_order: VecDeque<TlbKey>,
    /// 容量（条目数）
    capacity: usize,
    /// 条目时间戳计数器
    timestamp_counter: u64,
    /// 命中统计
    hit_count: u64,
    /// 未命中统计
    miss_count: u64,
}

impl TlbCache {
    /// 创建指定容量的 TLB 缓存
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            lru_order: VecDeque::with_capacity(capacity),
            capacity,
            timestamp_counter: 0,
            hit_count: 0,
            miss_count: 0,
        }
    }

    /// 查找地址转换
    ///
    /// 同一虚拟地址可能由不同大小的页面映射，按 PROBE_SIZES
    /// 从大到小依次计算基地址探测，首个匹配生效。
    ///
    /// # 返回
    /// - `Some(entry)`: 命中，条目移到 LRU 队尾
    /// - `None`: 未命中
    pub fn lookup(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
    ) -> Option<TlbEntry> {
        for page_size in PROBE_SIZES {
            let key = TlbKey {
                va_base: page_size.align_down(va),
                stream_id,
                asid,
                vmid,
            };

            if let Some(entry) = self.entries.get(&key) {
                let entry = entry.clone();
                self.touch(&key);
                self.hit_count += 1;
                trace!("tlb hit: va={:#x} stream={} pa={:#x}", va, stream_id, entry.pa);
                return Some(entry);
            }
        }

        self.miss_count += 1;
        trace!("tlb miss: va={:#x} stream={}", va, stream_id);
        None
    }

    /// 插入 TLB 条目
    ///
    /// 键由条目自身的页面大小决定；已存在的键整体替换，
    /// 容量满时淘汰最近最少使用的条目。
    pub fn insert(&mut self, entry: TlbEntry) {
        let key = TlbKey {
            va_base: entry.page_size.align_down(entry.va),
            stream_id: entry.stream_id,
            asid: entry.asid,
            vmid: entry.vmid,
        };

        if self.entries.contains_key(&key) {
            self.lru_order.retain(|k| *k != key);
        } else if self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        let mut entry = entry;
        entry.timestamp = self.timestamp_counter;
        self.timestamp_counter += 1;

        self.entries.insert(key, entry);
        self.lru_order.push_back(key);
    }

    /// 使所有条目失效
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.lru_order.clear();
    }

    /// 按 ASID 使条目失效
    pub fn invalidate_by_asid(&mut self, asid: Asid) {
        self.remove_matching(|entry| entry.asid == asid);
    }

    /// 按 VMID 使条目失效
    pub fn invalidate_by_vmid(&mut self, vmid: Vmid) {
        self.remove_matching(|entry| entry.vmid == vmid);
    }

    /// 按流ID使条目失效
    pub fn invalidate_by_stream(&mut self, stream_id: StreamId) {
        self.remove_matching(|entry| entry.stream_id == stream_id);
    }

    /// 按虚拟地址使条目失效
    ///
    /// 对每个探测页面大小计算目标基地址，移除 ASID 匹配且
    /// 自身页面大小下的基地址与之相等的条目。
    pub fn invalidate_by_va(&mut self, va: VirtualAddress, asid: Asid) {
        for page_size in PROBE_SIZES {
            let va_base = page_size.align_down(va);
            self.remove_matching(|entry| {
                entry.asid == asid && entry.page_size.align_down(entry.va) == va_base
            });
        }
    }

    /// 当前条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 命中次数
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// 未命中次数
    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    /// 将键移到 LRU 队尾（最近使用）
    fn touch(&mut self, key: &TlbKey) {
        self.lru_order.retain(|k| k != key);
        self.lru_order.push_back(*key);
    }

    /// 淘汰最近最少使用的条目
    fn evict_lru(&mut self) {
        if let Some(lru_key) = self.lru_order.pop_front() {
            self.entries.remove(&lru_key);
        }
    }

    /// 移除满足谓词的所有条目，并保持 LRU 队列一致
    fn remove_matching(&mut self, pred: impl Fn(&TlbEntry) -> bool) {
        self.entries.retain(|_, entry| !pred(entry));
        let entries = &self.entries;
        self.lru_order.retain(|key| entries.contains_key(key));
    }
}
