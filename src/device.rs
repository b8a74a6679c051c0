// SMMU 设备核心实现
//
// 组合转换缓存、页表遍历器与配置表，提供完整的设备功能：
// - 流表与上下文描述符管理
// - 两阶段地址转换管线（TLB 探测 -> 页表遍历 -> TLB 回填）
// - 命令队列（配置/失效命令，显式排空）
// - 事件队列（转换故障记录，轮询取出）
// - 统计信息维护

use log::{debug, trace, warn};
use parking_lot::RwLock;
use smmu_core::{
    Asid, Command, ContextDescriptor, Event, FaultType, MemoryRead, PageSize, PhysicalAddress,
    SmmuConfig, SmmuError, SmmuStats, StreamId, StreamTableEntry, TranslationResult,
    TranslationStage, VirtualAddress, Vmid,
};
use smmu_mem::PageTableWalker;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::tlb::{TlbCache, TlbEntry};

/// 阶段2遍历使用的固定中间物理地址大小（位数）
const STAGE2_IPS_BITS: u8 = 48;

/// SMMU 设备
///
/// 独占持有转换缓存、配置表、命令/事件队列与统计信息；
/// 物理内存模型经 `Arc<RwLock<_>>` 与遍历器共享。
/// 所有操作单线程串行执行，需要并发的调用方自行加锁。
pub struct SmmuDevice<M: MemoryRead> {
    /// 设备配置
    config: SmmuConfig,
    /// 是否已使能
    enabled: bool,
    /// 转换缓存
    tlb: TlbCache,
    /// 页表遍历器
    walker: PageTableWalker<M>,
    /// 流表：StreamId -> STE
    stream_table: HashMap<StreamId, StreamTableEntry>,
    /// 上下文描述符表：(StreamId, Asid) 复合键 -> CD
    context_descriptors: HashMap<u64, ContextDescriptor>,
    /// 命令队列（有界，溢出丢弃）
    command_queue: VecDeque<Command>,
    /// 事件队列（有界，溢出丢弃）
    event_queue: VecDeque<Event>,
    /// 统计信息
    stats: SmmuStats,
    /// 事件时间戳计数器
    timestamp_counter: u64,
}

impl<M: MemoryRead> SmmuDevice<M> {
    /// 创建新的 SMMU 设备
    ///
    /// # 参数
    /// - `config`: 设备配置（队列深度、TLB 容量等）
    /// - `memory`: 共享的物理内存模型，页表遍历经其读取描述符
    ///
    /// # 示例
    /// ```ignore
    /// let memory = Arc::new(RwLock::new(FlatMemory::default()));
    /// let mut smmu = SmmuDevice::new(SmmuConfig::default(), Arc::clone(&memory));
    /// ```
    pub fn new(config: SmmuConfig, memory: Arc<RwLock<M>>) -> Self {
        let tlb = TlbCache::new(config.tlb_size);
        let walker = PageTableWalker::new(memory);
        Self {
            config,
            enabled: false,
            tlb,
            walker,
            stream_table: HashMap::new(),
            context_descriptors: HashMap::new(),
            command_queue: VecDeque::new(),
            event_queue: VecDeque::new(),
            stats: SmmuStats::default(),
            timestamp_counter: 0,
        }
    }

    /// 配置流表项（整体替换）
    pub fn configure_stream(&mut self, stream_id: StreamId, ste: StreamTableEntry) {
        debug!(
            "configure stream {}: valid={} s1={} s2={}",
            stream_id, ste.valid, ste.s1_enabled, ste.s2_enabled
        );
        self.stream_table.insert(stream_id, ste);
    }

    /// 获取流表项；不存在时返回默认的无效表项
    pub fn get_stream(&self, stream_id: StreamId) -> StreamTableEntry {
        self.stream_table
            .get(&stream_id)
            .copied()
            .unwrap_or_default()
    }

    /// 配置上下文描述符（整体替换）
    pub fn configure_context(&mut self, stream_id: StreamId, asid: Asid, cd: ContextDescriptor) {
        debug!(
            "configure context ({}, {}): valid={} ttb={:#x} granule={}",
            stream_id, asid, cd.valid, cd.table_base, cd.granule
        );
        self.context_descriptors
            .insert(Self::make_cd_key(stream_id, asid), cd);
    }

    /// 获取上下文描述符；不存在时返回默认的无效描述符
    pub fn get_context(&self, stream_id: StreamId, asid: Asid) -> ContextDescriptor {
        self.context_descriptors
            .get(&Self::make_cd_key(stream_id, asid))
            .copied()
            .unwrap_or_default()
    }

    /// 执行地址转换
    ///
    /// 转换管线：TLB 探测 -> 流表查找 -> 按使能阶段遍历页表 ->
    /// 成功时回填 TLB。失败路径（设备禁用除外）生成事件并
    /// 递增故障计数。
    ///
    /// # 参数
    /// - `va`: 虚拟地址
    /// - `stream_id`: 流ID（设备标识）
    /// - `asid`: 地址空间ID
    /// - `vmid`: 虚拟机ID
    pub fn translate(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
    ) -> TranslationResult {
        self.stats.total_translations += 1;

        // 设备禁用时按约定不生成事件
        if !self.enabled {
            return TranslationResult::fault(SmmuError::Disabled);
        }

        // 快速路径：TLB 命中直接返回缓存的转换
        if let Some(entry) = self.tlb.lookup(va, stream_id, asid, vmid) {
            self.stats.tlb_hits += 1;
            return TranslationResult {
                success: true,
                physical_addr: entry.pa,
                memory_type: entry.memory_type,
                permission: entry.permission,
                cacheable: entry.cacheable,
                shareable: entry.shareable,
                fault_reason: String::new(),
            };
        }
        self.stats.tlb_misses += 1;

        let ste = self.get_stream(stream_id);
        if !ste.valid {
            return self.translation_fault(
                SmmuError::InvalidStreamTableEntry,
                stream_id,
                asid,
                vmid,
                va,
            );
        }

        let result = if ste.s1_enabled {
            let cd = self.get_context(stream_id, asid);
            let mut result = self.translate_stage1(va, stream_id, asid, &ste, &cd);

            // 阶段1的输出作为阶段2的输入（中间物理地址）
            if result.success && ste.s2_enabled {
                let ipa = result.physical_addr;
                result = self.translate_stage2(ipa, stream_id, &ste);
            }
            result
        } else if ste.s2_enabled {
            // 仅阶段2：虚拟地址即中间物理地址
            self.translate_stage2(va, stream_id, &ste)
        } else {
            return self.translation_fault(SmmuError::NoStagesEnabled, stream_id, asid, vmid, va);
        };

        if result.success {
            trace!(
                "translate ok: va={:#x} -> pa={:#x} (stream={}, asid={}, vmid={})",
                va,
                result.physical_addr,
                stream_id,
                asid,
                vmid
            );
            self.tlb.insert(TlbEntry {
                va,
                pa: result.physical_addr,
                stream_id,
                asid,
                vmid,
                // 基线行为：按 4KB 回填，不反映块映射的实际叶大小
                page_size: PageSize::Size4KB,
                memory_type: result.memory_type,
                permission: result.permission,
                cacheable: result.cacheable,
                shareable: result.shareable,
                stage: if ste.s1_enabled {
                    TranslationStage::Stage1
                } else {
                    TranslationStage::Stage2
                },
                timestamp: 0,
            });
        }

        result
    }

    /// 阶段1转换（虚拟地址 -> 中间物理地址）
    fn translate_stage1(
        &mut self,
        va: VirtualAddress,
        stream_id: StreamId,
        asid: Asid,
        ste: &StreamTableEntry,
        cd: &ContextDescriptor,
    ) -> TranslationResult {
        if !cd.valid {
            return self.translation_fault(
                SmmuError::InvalidContextDescriptor,
                stream_id,
                asid,
                ste.vmid,
                va,
            );
        }

        let result = self
            .walker
            .translate(va, cd.table_base, cd.granule, cd.ips, TranslationStage::Stage1);
        self.stats.page_table_walks += 1;

        if !result.success {
            self.record_walk_fault(&result, stream_id, asid, ste.vmid, va);
        }
        result
    }

    /// 阶段2转换（中间物理地址 -> 物理地址）
    fn translate_stage2(
        &mut self,
        ipa: PhysicalAddress,
        stream_id: StreamId,
        ste: &StreamTableEntry,
    ) -> TranslationResult {
        // 阶段2未启用时中间物理地址即最终物理地址
        if !ste.s2_enabled {
            return TranslationResult {
                success: true,
                physical_addr: ipa,
                ..TranslationResult::default()
            };
        }

        let result = self.walker.translate(
            ipa,
            ste.s2_table_base,
            ste.s2_granule,
            STAGE2_IPS_BITS,
            TranslationStage::Stage2,
        );
        self.stats.page_table_walks += 1;

        if !result.success {
            self.record_walk_fault(&result, stream_id, 0, ste.vmid, ipa);
        }
        result
    }

    /// 提交命令到命令队列；队列满时静默丢弃
    pub fn submit_command(&mut self, cmd: Command) {
        if self.command_queue.len() < self.config.command_queue_size {
            self.command_queue.push_back(cmd);
        } else {
            warn!("command queue full, dropping {:?}", cmd);
        }
    }

    /// 按提交顺序处理所有待处理的命令
    pub fn process_commands(&mut self) {
        while let Some(cmd) = self.command_queue.pop_front() {
            self.process_command(cmd);
        }
    }

    /// 处理单个命令
    fn process_command(&mut self, cmd: Command) {
        debug!("process command {:?}", cmd);
        match cmd {
            // 同步命令是顺序标记；预取在本模型中为空操作
            Command::Sync | Command::PrefetchConfig { .. } | Command::PrefetchAddr { .. } => {}
            Command::InvalidateStreamConfig { stream_id } => {
                self.tlb.invalidate_by_stream(stream_id)
            }
            Command::InvalidateContext { asid, .. } => self.tlb.invalidate_by_asid(asid),
            Command::InvalidateAllConfig | Command::InvalidateAllTlb => self.tlb.invalidate_all(),
            Command::InvalidateByAsid { asid } => self.tlb.invalidate_by_asid(asid),
            Command::InvalidateByVa { va, asid } => self.tlb.invalidate_by_va(va, asid),
            Command::InvalidateByVmid { vmid } => self.tlb.invalidate_by_vmid(vmid),
        }
        self.stats.commands_processed += 1;
    }

    /// 是否有待处理的事件
    pub fn has_events(&self) -> bool {
        !self.event_queue.is_empty()
    }

    /// 弹出下一个事件
    pub fn pop_event(&mut self) -> Option<Event> {
        self.event_queue.pop_front()
    }

    /// 待处理命令数（调用方可据此避免溢出丢弃）
    pub fn pending_commands(&self) -> usize {
        self.command_queue.len()
    }

    /// 待处理事件数
    pub fn pending_events(&self) -> usize {
        self.event_queue.len()
    }

    /// 使所有 TLB 条目失效
    pub fn invalidate_tlb_all(&mut self) {
        self.tlb.invalidate_all();
    }

    /// 按 ASID 使 TLB 条目失效
    pub fn invalidate_tlb_by_asid(&mut self, asid: Asid) {
        self.tlb.invalidate_by_asid(asid);
    }

    /// 按 VMID 使 TLB 条目失效
    pub fn invalidate_tlb_by_vmid(&mut self, vmid: Vmid) {
        self.tlb.invalidate_by_vmid(vmid);
    }

    /// 按虚拟地址使 TLB 条目失效
    pub fn invalidate_tlb_by_va(&mut self, va: VirtualAddress, asid: Asid) {
        self.tlb.invalidate_by_va(va, asid);
    }

    /// 按流ID使 TLB 条目失效
    pub fn invalidate_tlb_by_stream(&mut self, stream_id: StreamId) {
        self.tlb.invalidate_by_stream(stream_id);
    }

    /// 使能设备
    pub fn enable(&mut self) {
        debug!("smmu enabled");
        self.enabled = true;
    }

    /// 禁用设备
    pub fn disable(&mut self) {
        debug!("smmu disabled");
        self.enabled = false;
    }

    /// 是否已使能
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> SmmuStats {
        self.stats
    }

    /// 重置统计信息
    pub fn reset_stats(&mut self) {
        self.stats = SmmuStats::default();
    }

    /// 转换故障的统一出口：生成事件、递增故障计数并构造失败结果
    fn translation_fault(
        &mut self,
        err: SmmuError,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        va: VirtualAddress,
    ) -> TranslationResult {
        let result = TranslationResult::fault(err);
        self.generate_event(
            FaultType::Translation,
            stream_id,
            asid,
            vmid,
            va,
            &result.fault_reason,
        );
        self.stats.translation_faults += 1;
        result
    }

    /// 记录遍历失败：事件与故障计数，失败结果由调用方透传
    fn record_walk_fault(
        &mut self,
        result: &TranslationResult,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        va: VirtualAddress,
    ) {
        self.generate_event(
            FaultType::Translation,
            stream_id,
            asid,
            vmid,
            va,
            &result.fault_reason,
        );
        self.stats.translation_faults += 1;
    }

    /// 生成事件；队列满时丢弃且不计入已生成事件数
    fn generate_event(
        &mut self,
        fault_type: FaultType,
        stream_id: StreamId,
        asid: Asid,
        vmid: Vmid,
        va: VirtualAddress,
        description: &str,
    ) {
        warn!(
            "fault: {:?} stream={} asid={} vmid={} va={:#x}: {}",
            fault_type, stream_id, asid, vmid, va, description
        );

        if self.event_queue.len() >= self.config.event_queue_size {
            return;
        }

        let event = Event {
            fault_type,
            stream_id,
            asid,
            vmid,
            va,
            description: description.to_string(),
            timestamp: self.timestamp_counter,
        };
        self.timestamp_counter += 1;
        self.event_queue.push_back(event);
        self.stats.events_generated += 1;
    }

    /// 上下文描述符复合键：stream_id 左移16位与 asid 拼接
    fn make_cd_key(stream_id: StreamId, asid: Asid) -> u64 {
        (u64::from(stream_id) << 16) | u64::from(asid)
    }
}
