// SMMU错误类型定义
//
// This module provides the unified error type for the SMMU model.
// The Display text of each variant is the fault reason reported in
// translation results and fault events, so the strings are part of
// the observable interface.

/// SMMU错误类型
///
/// 覆盖转换管线各失败路径：设备禁用、配置缺失、页表遍历失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SmmuError {
    /// 设备未使能
    #[error("SMMU is disabled")]
    Disabled,

    /// 流表项缺失或无效
    #[error("Invalid stream table entry")]
    InvalidStreamTableEntry,

    /// 上下文描述符缺失或无效
    #[error("Invalid context descriptor")]
    InvalidContextDescriptor,

    /// 流表项未启用任何转换阶段
    #[error("No translation stages enabled")]
    NoStagesEnabled,

    /// 转换粒度不属于 {12, 14, 16}
    #[error("Invalid granule size")]
    InvalidGranuleSize,

    /// 描述符读取失败（越界或被拒绝）
    #[error("Failed to read descriptor")]
    DescriptorReadFailed,

    /// 描述符有效位为零
    #[error("Translation fault: invalid descriptor")]
    InvalidDescriptor,

    /// 遍历超过最大级别仍未到达叶描述符
    #[error("Translation fault: exceeded max level")]
    ExceededMaxLevel,
}

/// SMMU结果类型
pub type SmmuResult<T> = Result<T, SmmuError>;
