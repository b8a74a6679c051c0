//! # smmu-core - SMMU 功能模型核心库
//!
//! 提供 SMMU 功能模型的核心类型定义、错误类型和内存访问抽象。
//!
//! ## 主要组件
//!
//! - **类型定义**: [`PhysicalAddress`]、[`VirtualAddress`]、[`StreamId`] 等地址类型，
//!   以及 [`PageSize`]、[`MemoryType`]、[`AccessPermission`] 等架构枚举
//! - **配置记录**: [`StreamTableEntry`]（流表项）与 [`ContextDescriptor`]（上下文描述符）
//! - **命令与事件**: [`Command`] 命令队列条目与 [`Event`] 事件队列条目
//! - **错误处理**: [`SmmuError`] 统一错误类型，Display 文本即对外故障原因
//! - **内存抽象**: [`MemoryRead`] / [`MemoryModel`] trait，页表遍历器据此读取描述符

pub mod error;
pub mod memory;
pub mod types;

pub use error::{SmmuError, SmmuResult};
pub use memory::{MemoryModel, MemoryRead};
pub use types::{
    AccessPermission, Asid, Command, ContextDescriptor, Event, FaultType, MemoryType, PageSize,
    PhysicalAddress, SmmuConfig, SmmuStats, StreamId, StreamTableEntry, TranslationResult,
    TranslationStage, VirtualAddress, Vmid,
};
