// SMMU 核心类型定义
//
// 定义功能模型中使用的地址类型、架构枚举和配置记录，包括：
// - 地址与标识符类型别名
// - 页面大小、转换阶段、内存属性、访问权限枚举
// - 流表项（STE）与上下文描述符（CD）
// - 命令/事件记录与统计信息

use serde::{Deserialize, Serialize};

/// 物理地址类型（64位）
pub type PhysicalAddress = u64;
/// 虚拟地址类型（64位）
pub type VirtualAddress = u64;
/// 流ID，用于识别不同的设备（32位）
pub type StreamId = u32;
/// 地址空间ID（Address Space ID，阶段1标签）
pub type Asid = u16;
/// 虚拟机ID（Virtual Machine ID，阶段2标签）
pub type Vmid = u16;

/// 页面大小
///
/// 枚举值即页面字节数，覆盖各粒度下的页与块大小。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum PageSize {
    /// 4KB 页面
    Size4KB = 0x1000,
    /// 16KB 页面
    Size16KB = 0x4000,
    /// 64KB 页面
    Size64KB = 0x10000,
    /// 2MB 块
    Size2MB = 0x20_0000,
    /// 32MB 块
    Size32MB = 0x200_0000,
    /// 512MB 块
    Size512MB = 0x2000_0000,
    /// 1GB 块
    Size1GB = 0x4000_0000,
}

impl PageSize {
    /// 页面字节数
    pub fn bytes(self) -> u64 {
        self as u64
    }

    /// 将地址向下对齐到页面边界
    pub fn align_down(self, addr: u64) -> u64 {
        addr & !(self.bytes() - 1)
    }
}

/// 地址转换阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationStage {
    /// 阶段1转换（虚拟地址 -> 中间物理地址）
    Stage1,
    /// 阶段2转换（中间物理地址 -> 物理地址）
    Stage2,
    /// 两阶段转换
    Stage1And2,
}

/// 内存属性类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryType {
    /// 设备内存：不可聚合、不可重排序、无提前写确认
    DeviceNGnRnE,
    /// 设备内存：不可聚合、不可重排序、有提前写确认
    DeviceNGnRE,
    /// 设备内存：不可聚合、可重排序、有提前写确认
    DeviceNGRE,
    /// 设备内存：可聚合、可重排序、有提前写确认
    DeviceGRE,
    /// 普通内存：不可缓存
    NormalNC,
    /// 普通内存：写穿透（Write-Through）
    NormalWT,
    /// 普通内存：写回（Write-Back）
    NormalWB,
}

impl MemoryType {
    /// 该内存类型是否可缓存（仅普通写穿透/写回内存）
    pub fn is_cacheable(self) -> bool {
        matches!(self, MemoryType::NormalWT | MemoryType::NormalWB)
    }
}

/// 访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPermission {
    /// 无访问权限
    None,
    /// 只读
    ReadOnly,
    /// 只写
    WriteOnly,
    /// 读写
    ReadWrite,
}

/// 故障类型
///
/// Permission/Access/AddressSize/CacheConflict/UnsupportedUpstream
/// 为保留类型，当前模型只产生 Translation 故障。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// 无故障
    None,
    /// 转换故障（页表项无效、配置缺失等）
    Translation,
    /// 权限故障
    Permission,
    /// 访问故障
    Access,
    /// 地址大小故障
    AddressSize,
    /// 缓存冲突故障
    CacheConflict,
    /// 不支持的上游事务
    UnsupportedUpstream,
}

/// 命令队列条目
///
/// 配置失效与 TLB 失效命令，由设备的有界命令队列承载，
/// 溢出时静默丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// 同步命令（顺序标记，无副作用）
    Sync,
    /// 预取流配置（本模型中为空操作）
    PrefetchConfig {
        /// 目标流ID
        stream_id: StreamId,
    },
    /// 预取地址转换（本模型中为空操作）
    PrefetchAddr {
        /// 目标流ID
        stream_id: StreamId,
        /// 预取的虚拟地址
        va: VirtualAddress,
    },
    /// 使指定流的缓存转换失效
    InvalidateStreamConfig {
        /// 目标流ID
        stream_id: StreamId,
    },
    /// 使指定上下文的缓存转换失效
    InvalidateContext {
        /// 目标流ID
        stream_id: StreamId,
        /// 目标地址空间ID
        asid: Asid,
    },
    /// 使所有配置缓存失效
    InvalidateAllConfig,
    /// 使所有 TLB 条目失效
    InvalidateAllTlb,
    /// 按 ASID 使 TLB 条目失效
    InvalidateByAsid {
        /// 目标地址空间ID
        asid: Asid,
    },
    /// 按虚拟地址使 TLB 条目失效
    InvalidateByVa {
        /// 目标虚拟地址
        va: VirtualAddress,
        /// 目标地址空间ID
        asid: Asid,
    },
    /// 按 VMID 使 TLB 条目失效
    InvalidateByVmid {
        /// 目标虚拟机ID
        vmid: Vmid,
    },
}

/// 事件队列条目
///
/// 记录转换失败产生的故障信息，消费者通过轮询取出。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 故障类型
    pub fault_type: FaultType,
    /// 相关的流ID
    pub stream_id: StreamId,
    /// 相关的地址空间ID
    pub asid: Asid,
    /// 相关的虚拟机ID
    pub vmid: Vmid,
    /// 相关的虚拟地址
    pub va: VirtualAddress,
    /// 故障描述
    pub description: String,
    /// 单调时间戳
    pub timestamp: u64,
}

/// 流表项（Stream Table Entry）
///
/// 每个设备（流）的转换配置，整体替换，默认无效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTableEntry {
    /// 表项是否有效
    pub valid: bool,
    /// 是否启用阶段1转换
    pub s1_enabled: bool,
    /// 是否启用阶段2转换
    pub s2_enabled: bool,
    /// 阶段1上下文描述符指针
    pub s1_context_ptr: PhysicalAddress,
    /// 阶段2转换表基地址
    pub s2_table_base: PhysicalAddress,
    /// 虚拟机ID
    pub vmid: Vmid,
    /// 阶段1格式（保留字段）
    pub s1_format: u8,
    /// 阶段2页面粒度（位数）
    pub s2_granule: u8,
}

impl Default for StreamTableEntry {
    fn default() -> Self {
        Self {
            valid: false,
            s1_enabled: false,
            s2_enabled: false,
            s1_context_ptr: 0,
            s2_table_base: 0,
            vmid: 0,
            s1_format: 0,
            s2_granule: 0,
        }
    }
}

/// 上下文描述符（Context Descriptor）
///
/// 定义一个地址空间的转换配置，按 (StreamId, Asid) 复合键存储。
/// 可用配置的粒度必须属于 {12, 14, 16}，其余值在转换时失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDescriptor {
    /// 描述符是否有效
    pub valid: bool,
    /// 转换表基地址
    pub table_base: PhysicalAddress,
    /// 地址空间ID
    pub asid: Asid,
    /// 转换粒度（12=4KB, 14=16KB, 16=64KB）
    pub granule: u8,
    /// 中间物理地址大小（位数）
    pub ips: u8,
    /// 共享性属性（仅存储，不强制）
    pub sh: u8,
    /// 外部缓存属性（仅存储，不强制）
    pub orgn: u8,
    /// 内部缓存属性（仅存储，不强制）
    pub irgn: u8,
}

impl Default for ContextDescriptor {
    fn default() -> Self {
        Self {
            valid: false,
            table_base: 0,
            asid: 0,
            granule: 0,
            ips: 0,
            sh: 0,
            orgn: 0,
            irgn: 0,
        }
    }
}

/// 地址转换结果
///
/// 失败时仅 `fault_reason` 有意义。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    /// 转换是否成功
    pub success: bool,
    /// 转换后的物理地址
    pub physical_addr: PhysicalAddress,
    /// 内存类型
    pub memory_type: MemoryType,
    /// 访问权限
    pub permission: AccessPermission,
    /// 是否可缓存
    pub cacheable: bool,
    /// 是否可共享
    pub shareable: bool,
    /// 失败原因（转换失败时）
    pub fault_reason: String,
}

impl Default for TranslationResult {
    fn default() -> Self {
        Self {
            success: false,
            physical_addr: 0,
            memory_type: MemoryType::NormalWB,
            permission: AccessPermission::None,
            cacheable: true,
            shareable: false,
            fault_reason: String::new(),
        }
    }
}

impl TranslationResult {
    /// 构造失败结果，失败原因取错误的 Display 文本
    pub fn fault(err: crate::error::SmmuError) -> Self {
        Self {
            fault_reason: err.to_string(),
            ..Self::default()
        }
    }
}

/// SMMU 设备配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmmuConfig {
    /// TLB 容量（条目数）
    pub tlb_size: usize,
    /// 流表容量（建议值，不作硬限制）
    pub stream_table_size: usize,
    /// 命令队列深度（硬限制，溢出丢弃）
    pub command_queue_size: usize,
    /// 事件队列深度（硬限制，溢出丢弃）
    pub event_queue_size: usize,
    /// 阶段1转换默认使能
    pub stage1_enabled: bool,
    /// 阶段2转换默认使能
    pub stage2_enabled: bool,
}

impl Default for SmmuConfig {
    fn default() -> Self {
        Self {
            tlb_size: 128,
            stream_table_size: 256,
            command_queue_size: 64,
            event_queue_size: 64,
            stage1_enabled: true,
            stage2_enabled: false,
        }
    }
}

/// SMMU 统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmmuStats {
    /// 总地址转换次数
    pub total_translations: u64,
    /// TLB 命中次数
    pub tlb_hits: u64,
    /// TLB 未命中次数
    pub tlb_misses: u64,
    /// 页表遍历次数
    pub page_table_walks: u64,
    /// 转换故障次数
    pub translation_faults: u64,
    /// 权限故障次数
    pub permission_faults: u64,
    /// 已处理命令数
    pub commands_processed: u64,
    /// 已生成事件数
    pub events_generated: u64,
}

impl SmmuStats {
    /// TLB 命中率（无转换时为 0）
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.tlb_hits + self.tlb_misses;
        if lookups > 0 {
            self.tlb_hits as f64 / lookups as f64
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for SmmuStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SMMU统计信息")?;
        writeln!(f, "  总转换次数: {}", self.total_translations)?;
        writeln!(f, "  TLB命中次数: {}", self.tlb_hits)?;
        writeln!(f, "  TLB未命中次数: {}", self.tlb_misses)?;
        writeln!(f, "  命中率: {:.2}%", self.hit_rate() * 100.0)?;
        writeln!(f, "  页表遍历次数: {}", self.page_table_walks)?;
        writeln!(f, "  转换故障次数: {}", self.translation_faults)?;
        writeln!(f, "  权限故障次数: {}", self.permission_faults)?;
        writeln!(f, "  已处理命令数: {}", self.commands_processed)?;
        writeln!(f, "  已生成事件数: {}", self.events_generated)
    }
}
