// 多级页表遍历器
//
// 从转换表基地址开始逐级下降，直到到达叶描述符：
// - 粒度决定级别调度（4KB/16KB 从 L0 起，64KB 从 L1 起）
// - 每级从虚拟地址提取索引，经内存模型读取8字节描述符
// - 表描述符继续下降，块/页描述符终止并产出物理地址与属性
//
// 遍历器除内存模型引用外无状态。

use log::trace;
use parking_lot::RwLock;
use smmu_core::{
    MemoryRead, PageSize, PhysicalAddress, SmmuError, SmmuResult, TranslationResult,
    TranslationStage, VirtualAddress,
};
use std::sync::Arc;

use crate::descriptor::{parse_descriptor, DescriptorAttrs, PageDescriptor};

/// 每个描述符8字节
const DESCRIPTOR_SIZE: u64 = 8;

/// 根据页表级别和粒度返回叶描述符映射的页面大小
pub fn page_size_for(level: u8, granule_size: u8) -> PageSize {
    match granule_size {
        12 => match level {
            0 => PageSize::Size512MB,
            1 => PageSize::Size2MB,
            _ => PageSize::Size4KB,
        },
        14 => match level {
            0 => PageSize::Size1GB,
            1 => PageSize::Size32MB,
            _ => PageSize::Size16KB,
        },
        16 => match level {
            1 => PageSize::Size512MB,
            _ => PageSize::Size64KB,
        },
        _ => PageSize::Size4KB,
    }
}

/// 粒度对应的级别调度（起始级别，最大级别）
fn level_schedule(granule_size: u8) -> SmmuResult<(u8, u8)> {
    match granule_size {
        // 4KB/16KB 粒度从 L0 开始
        12 | 14 => Ok((0, 3)),
        // 64KB 粒度没有 L0
        16 => Ok((1, 3)),
        _ => Err(SmmuError::InvalidGranuleSize),
    }
}

/// 遍历到叶描述符的输出
struct WalkLeaf {
    physical_addr: PhysicalAddress,
    attrs: DescriptorAttrs,
}

/// 页表遍历器
///
/// 对任何提供带大小读取能力的内存模型泛化；
/// 内存模型由调用方共享，遍历期间按描述符加读锁。
pub struct PageTableWalker<M: MemoryRead> {
    /// 物理内存模型
    memory: Arc<RwLock<M>>,
}

impl<M: MemoryRead> PageTableWalker<M> {
    /// 创建遍历器
    pub fn new(memory: Arc<RwLock<M>>) -> Self {
        Self { memory }
    }

    /// 执行地址转换
    ///
    /// # 参数
    /// - `va`: 要转换的虚拟地址（阶段2时为中间物理地址）
    /// - `ttb`: 转换表基地址
    /// - `granule_size`: 页面粒度（12=4KB, 14=16KB, 16=64KB）
    /// - `ips_bits`: 中间物理地址大小（位数，当前仅记录）
    /// - `stage`: 转换阶段
    pub fn translate(
        &self,
        va: VirtualAddress,
        ttb: PhysicalAddress,
        granule_size: u8,
        ips_bits: u8,
        stage: TranslationStage,
    ) -> TranslationResult {
        trace!(
            "page table walk: va={:#x} ttb={:#x} granule={} ips={} stage={:?}",
            va,
            ttb,
            granule_size,
            ips_bits,
            stage
        );

        let (start_level, max_level) = match level_schedule(granule_size) {
            Ok(schedule) => schedule,
            Err(err) => return TranslationResult::fault(err),
        };

        match self.walk_table(va, ttb, granule_size, start_level, max_level) {
            Ok(leaf) => TranslationResult {
                success: true,
                physical_addr: leaf.physical_addr,
                memory_type: leaf.attrs.memory_type,
                permission: leaf.attrs.permission,
                cacheable: leaf.attrs.memory_type.is_cacheable(),
                shareable: leaf.attrs.shareable,
                fault_reason: String::new(),
            },
            Err(err) => TranslationResult::fault(err),
        }
    }

    /// 逐级遍历页表直到叶描述符
    fn walk_table(
        &self,
        va: VirtualAddress,
        ttb: PhysicalAddress,
        granule_size: u8,
        start_level: u8,
        max_level: u8,
    ) -> SmmuResult<WalkLeaf> {
        let bits_per_level = u64::from(granule_size) - 3;
        let index_mask = (1u64 << bits_per_level) - 1;

        let mut table_base = ttb;
        let mut level = start_level;

        while level <= max_level {
            let shift = u64::from(granule_size) + u64::from(3 - level) * bits_per_level;
            let index = (va >> shift) & index_mask;
            let desc_addr = table_base + index * DESCRIPTOR_SIZE;

            let desc = self.read_descriptor(desc_addr)?;

            match parse_descriptor(desc, level, granule_size) {
                PageDescriptor::Invalid => return Err(SmmuError::InvalidDescriptor),
                PageDescriptor::Leaf { address, attrs } => {
                    let page_size = page_size_for(level, granule_size);
                    let offset = va & (page_size.bytes() - 1);
                    return Ok(WalkLeaf {
                        physical_addr: address + offset,
                        attrs,
                    });
                }
                PageDescriptor::Table { next_base } => {
                    table_base = next_base;
                    level += 1;
                }
            }
        }

        Err(SmmuError::ExceededMaxLevel)
    }

    /// 从物理内存读取64位描述符（小端序）
    fn read_descriptor(&self, addr: PhysicalAddress) -> SmmuResult<u64> {
        let mut buf = [0u8; 8];
        if !self.memory.read().read(addr, &mut buf) {
            return Err(SmmuError::DescriptorReadFailed);
        }
        Ok(u64::from_le_bytes(buf))
    }
}
