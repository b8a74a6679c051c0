// 物理内存访问抽象
//
// 页表遍历器通过 MemoryRead 读取描述符；完整的内存模型在此之上
// 增加写入与页面分配能力，供测试与上层驱动构建页表。

use crate::types::PhysicalAddress;

/// 带大小的物理内存读取能力
///
/// 遍历器仅依赖此 trait，不绑定具体的字节存储实现。
/// 读取越过后备存储末端必须返回 `false`，遍历器会将其
/// 转换为转换故障。
pub trait MemoryRead {
    /// 从 `addr` 读取 `buf.len()` 字节到 `buf`
    ///
    /// # 返回
    /// - `true`: 读取成功
    /// - `false`: 地址越界或读取被拒绝
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) -> bool;
}

/// 完整的物理内存模型
///
/// 在读取能力之上提供写入、页面分配与描述符写入，
/// 用于搭建页表布局。
pub trait MemoryModel: MemoryRead {
    /// 向物理内存写入数据；越界写入被忽略
    fn write(&mut self, addr: PhysicalAddress, data: &[u8]);

    /// 分配一个物理页面（简单顺序分配器）
    ///
    /// # 返回
    /// - 分配的物理地址；内存耗尽时返回 0
    fn allocate_page(&mut self, size: usize) -> PhysicalAddress;

    /// 写入一个64位页表描述符（小端序）
    fn write_descriptor(&mut self, addr: PhysicalAddress, desc: u64) {
        self.write(addr, &desc.to_le_bytes());
    }
}
