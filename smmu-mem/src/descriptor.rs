// 页表描述符解析
//
// 将64位描述符字解析为带判别式的结构化描述符：
// - Invalid: 有效位为零
// - Table: 表描述符，指向下一级页表
// - Leaf: 块/页描述符，携带物理基地址与属性
//
// 解析对有效位之外的异常位保持宽容，不产生故障。

use smmu_core::{AccessPermission, MemoryType, PhysicalAddress};

/// 有效位（bit 0）
const DESC_VALID: u64 = 1 << 0;
/// 类型位（bit 1）：L0-L2 上 1 = 表描述符，0 = 块描述符
const DESC_TABLE: u64 = 1 << 1;
/// 访问标志（bit 10）
const DESC_AF: u64 = 1 << 10;
/// 脏位提示（bit 51）
const DESC_DIRTY: u64 = 1 << 51;
/// 连续位提示（bit 52）
const DESC_CONTIGUOUS: u64 = 1 << 52;
/// 特权执行永不（bit 53）
const DESC_PXN: u64 = 1 << 53;
/// 执行永不（bit 54）
const DESC_XN: u64 = 1 << 54;
/// 输出地址位域（bits [47:12]）
const DESC_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// 叶描述符属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorAttrs {
    /// 访问权限（AP[1:0] 解码，特权/非特权变体合并）
    pub permission: AccessPermission,
    /// 内存属性（AttrIndx[2:0] 解码）
    pub memory_type: MemoryType,
    /// 是否可共享（SH[1:0] 非零）
    pub shareable: bool,
    /// 访问标志
    pub access_flag: bool,
    /// 脏位提示
    pub dirty: bool,
    /// 连续位提示
    pub contiguous: bool,
    /// 特权执行永不（PXN）
    pub privileged_execute_never: bool,
    /// 执行永不（XN）
    pub execute_never: bool,
}

/// 解析后的页表描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDescriptor {
    /// 无效描述符，消费者必须按转换故障处理
    Invalid,
    /// 表描述符：输出地址指向下一级页表
    Table {
        /// 下一级页表基地址
        next_base: PhysicalAddress,
    },
    /// 块/页描述符：叶映射
    Leaf {
        /// 映射区域的物理基地址
        address: PhysicalAddress,
        /// 叶属性
        attrs: DescriptorAttrs,
    },
}

/// 解析64位页表描述符
///
/// # 参数
/// - `desc`: 64位描述符字
/// - `level`: 页表级别（0-3）。L3 级别总是页描述符，与类型位无关
/// - `_granule_size`: 页面粒度（位数），地址位域在各粒度下一致
pub fn parse_descriptor(desc: u64, level: u8, _granule_size: u8) -> PageDescriptor {
    if desc & DESC_VALID == 0 {
        return PageDescriptor::Invalid;
    }

    let address = desc & DESC_ADDR_MASK;

    // L0-L2 由类型位区分表/块描述符；L3 总是页描述符
    if level < 3 && desc & DESC_TABLE != 0 {
        return PageDescriptor::Table { next_base: address };
    }

    // AP[1:0]（bits [7:6]）：0/1 = 读写，2/3 = 只读
    let permission = match (desc >> 6) & 0x3 {
        0 | 1 => AccessPermission::ReadWrite,
        _ => AccessPermission::ReadOnly,
    };

    // AttrIndx[2:0]（bits [4:2]）索引内存属性
    let memory_type = match (desc >> 2) & 0x7 {
        0 => MemoryType::DeviceNGnRnE,
        1 => MemoryType::DeviceNGnRE,
        2 => MemoryType::NormalNC,
        3 => MemoryType::NormalWT,
        _ => MemoryType::NormalWB,
    };

    let attrs = DescriptorAttrs {
        permission,
        memory_type,
        // SH[1:0]（bits [9:8]）：非零即视为可共享
        shareable: (desc >> 8) & 0x3 != 0,
        access_flag: desc & DESC_AF != 0,
        dirty: desc & DESC_DIRTY != 0,
        contiguous: desc & DESC_CONTIGUOUS != 0,
        privileged_execute_never: desc & DESC_PXN != 0,
        execute_never: desc & DESC_XN != 0,
    };

    PageDescriptor::Leaf { address, attrs }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// 解析是确定性的纯函数
        #[test]
        fn parse_is_deterministic(desc in any::<u64>(), level in 0u8..4, granule in prop::sample::select(vec![12u8, 14, 16])) {
            prop_assert_eq!(
                parse_descriptor(desc, level, granule),
                parse_descriptor(desc, level, granule)
            );
        }

        /// 输出地址总是4KB对齐且落在 [47:12] 位域内
        #[test]
        fn output_address_in_field(desc in any::<u64>(), level in 0u8..4, granule in prop::sample::select(vec![12u8, 14, 16])) {
            let addr = match parse_descriptor(desc, level, granule) {
                PageDescriptor::Invalid => return Ok(()),
                PageDescriptor::Table { next_base } => next_base,
                PageDescriptor::Leaf { address, .. } => address,
            };
            prop_assert_eq!(addr & 0xFFF, 0);
            prop_assert_eq!(addr & !0x0000_FFFF_FFFF_F000u64, 0);
        }

        /// L3 级别的有效描述符永远不是表描述符
        #[test]
        fn l3_never_table(desc in any::<u64>(), granule in prop::sample::select(vec![12u8, 14, 16])) {
            let is_table = matches!(
                parse_descriptor(desc, 3, granule),
                PageDescriptor::Table { .. }
            );
            prop_assert!(!is_table);
        }
    }
}
