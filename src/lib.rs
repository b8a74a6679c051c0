//! # smmu-model - ARM SMMUv3 功能模型
//!
//! 面向系统级仿真与教学的 SMMUv3 功能模型：按设备配置驱动的
//! 地址转换、多级页表遍历、带 LRU 淘汰的转换缓存（TLB），以及
//! 配置/失效命令队列与故障事件队列。不模拟真实硬件效应、DMA
//! 数据搬运或时序。
//!
//! ## 主要组件
//!
//! - [`SmmuDevice`]: 转换协调器，组合下列组件并维护统计信息
//! - [`TlbCache`]: 以 (页基地址, 流ID, ASID, VMID) 为键的有界转换缓存
//! - [`PageTableWalker`]（来自 `smmu-mem`）: 多级描述符遍历
//! - [`FlatMemory`]（来自 `smmu-mem`）: 页表所在的平坦物理内存模型
//!
//! ## 示例
//!
//! ```rust,ignore
//! use parking_lot::RwLock;
//! use smmu_model::{FlatMemory, SmmuConfig, SmmuDevice};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(RwLock::new(FlatMemory::default()));
//! let mut smmu = SmmuDevice::new(SmmuConfig::default(), Arc::clone(&memory));
//! smmu.enable();
//! let result = smmu.translate(0x1000, 0, 1, 0);
//! ```

pub mod device;
pub mod tlb;

pub use device::SmmuDevice;
pub use tlb::{TlbCache, TlbEntry};

pub use smmu_core::{
    AccessPermission, Asid, Command, ContextDescriptor, Event, FaultType, MemoryModel, MemoryRead,
    MemoryType, PageSize, PhysicalAddress, SmmuConfig, SmmuError, SmmuResult, SmmuStats, StreamId,
    StreamTableEntry, TranslationResult, TranslationStage, VirtualAddress, Vmid,
};
pub use smmu_mem::{
    page_size_for, parse_descriptor, DescriptorAttrs, FlatMemory, PageDescriptor, PageTableWalker,
};
