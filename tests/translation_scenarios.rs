//! 地址转换端到端场景测试
//!
//! 通过内存模型搭建真实页表布局，覆盖转换管线的完整路径：
//! 基本转换、TLB 命中/失效、故障事件与统计一致性。

use parking_lot::RwLock;
use smmu_model::{
    Command, ContextDescriptor, FaultType, FlatMemory, MemoryModel, MemoryRead, MemoryType,
    PhysicalAddress, SmmuConfig, SmmuDevice, StreamTableEntry, VirtualAddress,
};
use std::sync::Arc;

/// 表描述符：有效位 + 类型位
const TABLE_DESC_BITS: u64 = 0b11;
/// 页描述符：有效位 + 类型位 + 访问标志 + 属性索引4（NormalWB）
const PAGE_DESC_BITS: u64 = 0x403 | (0x4 << 2);

type SharedMemory = Arc<RwLock<FlatMemory>>;

fn setup() -> (SmmuDevice<FlatMemory>, SharedMemory) {
    let memory = Arc::new(RwLock::new(FlatMemory::new(16 * 1024 * 1024)));
    let smmu = SmmuDevice::new(SmmuConfig::default(), Arc::clone(&memory));
    (smmu, memory)
}

/// 搭建 granule=12 的四级页表，将 `va` 所在页映射到 `pa`
fn build_4k_mapping(memory: &SharedMemory, va: VirtualAddress, pa: PhysicalAddress) -> u64 {
    let mut mem = memory.write();
    let l0 = mem.allocate_page(4096);
    let l1 = mem.allocate_page(4096);
    let l2 = mem.allocate_page(4096);
    let l3 = mem.allocate_page(4096);

    let idx = |level: u8| (va >> (12 + (3 - level) as u64 * 9)) & 0x1ff;
    mem.write_descriptor(l0 + idx(0) * 8, l1 | TABLE_DESC_BITS);
    mem.write_descriptor(l1 + idx(1) * 8, l2 | TABLE_DESC_BITS);
    mem.write_descriptor(l2 + idx(2) * 8, l3 | TABLE_DESC_BITS);
    mem.write_descriptor(l3 + idx(3) * 8, pa | PAGE_DESC_BITS);
    l0
}

/// 在已有页表中追加一条 `va` -> `pa` 映射（复用共享的上级表）
fn add_4k_mapping(memory: &SharedMemory, ttb: u64, va: VirtualAddress, pa: PhysicalAddress) {
    let mut mem = memory.write();
    let idx = |level: u8| (va >> (12 + (3 - level) as u64 * 9)) & 0x1ff;

    // 逐级跟随已写入的表描述符
    let mut table = ttb;
    for level in 0..3u8 {
        let mut buf = [0u8; 8];
        assert!(mem.read(table + idx(level) * 8, &mut buf));
        let desc = u64::from_le_bytes(buf);
        assert_ne!(desc & 1, 0, "intermediate table missing at level {}", level);
        table = desc & 0x0000_FFFF_FFFF_F000;
    }
    mem.write_descriptor(table + idx(3) * 8, pa | PAGE_DESC_BITS);
}

fn stage1_stream() -> StreamTableEntry {
    StreamTableEntry {
        valid: true,
        s1_enabled: true,
        ..StreamTableEntry::default()
    }
}

fn context_with_table(asid: u16, ttb: u64) -> ContextDescriptor {
    ContextDescriptor {
        valid: true,
        table_base: ttb,
        asid,
        granule: 12,
        ips: 48,
        ..ContextDescriptor::default()
    }
}

#[test]
fn basic_4k_translation() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    let result = smmu.translate(0x1000, 0, 1, 0);
    assert!(result.success, "{}", result.fault_reason);
    assert_eq!(result.physical_addr, 0x101000);
    assert_eq!(result.memory_type, MemoryType::NormalWB);
    assert_eq!(
        result.permission,
        smmu_model::AccessPermission::ReadWrite
    );
    assert!(result.cacheable);

    let stats = smmu.get_stats();
    assert_eq!(stats.total_translations, 1);
    assert_eq!(stats.tlb_misses, 1);
    assert_eq!(stats.page_table_walks, 1);
}

#[test]
fn repeat_translation_hits_tlb() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    let first = smmu.translate(0x1000, 0, 1, 0);
    let walks_after_first = smmu.get_stats().page_table_walks;
    let second = smmu.translate(0x1000, 0, 1, 0);

    assert!(second.success);
    // 第二次必须命中且结果与首次一致
    assert_eq!(second, first);
    let stats = smmu.get_stats();
    assert_eq!(stats.tlb_hits, 1);
    assert_eq!(stats.page_table_walks, walks_after_first);
}

#[test]
fn invalidate_by_asid_forces_new_walk() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    smmu.translate(0x1000, 0, 1, 0);
    smmu.translate(0x1000, 0, 1, 0);
    let before = smmu.get_stats();

    smmu.submit_command(Command::InvalidateByAsid { asid: 1 });
    smmu.process_commands();

    let result = smmu.translate(0x1000, 0, 1, 0);
    assert!(result.success);
    assert_eq!(result.physical_addr, 0x101000);

    let after = smmu.get_stats();
    assert_eq!(after.tlb_misses, before.tlb_misses + 1);
    assert_eq!(after.page_table_walks, before.page_table_walks + 1);
    assert_eq!(after.commands_processed, before.commands_processed + 1);
}

#[test]
fn unconfigured_stream_faults_with_event() {
    let (mut smmu, _memory) = setup();
    smmu.enable();

    let result = smmu.translate(0x1000, 7, 1, 0);
    assert!(!result.success);
    assert_eq!(result.fault_reason, "Invalid stream table entry");

    assert!(smmu.has_events());
    let event = smmu.pop_event().expect("expected fault event");
    assert_eq!(event.fault_type, FaultType::Translation);
    assert_eq!(event.stream_id, 7);
    assert_eq!(event.description, "Invalid stream table entry");
    assert!(!smmu.has_events());
}

#[test]
fn unmapped_address_faults_and_counts() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    let result = smmu.translate(0x10_0000, 0, 1, 0);
    assert!(!result.success);
    assert_eq!(result.fault_reason, "Translation fault: invalid descriptor");

    assert!(smmu.has_events());
    assert_eq!(smmu.get_stats().translation_faults, 1);
}

#[test]
fn bad_granule_rejected() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    let mut cd = context_with_table(1, ttb);
    cd.granule = 13;
    smmu.configure_context(0, 1, cd);
    smmu.enable();

    let result = smmu.translate(0x1000, 0, 1, 0);
    assert!(!result.success);
    assert_eq!(result.fault_reason, "Invalid granule size");
}

#[test]
fn stage2_only_translation() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x6000, 0x30_0000);

    let ste = StreamTableEntry {
        valid: true,
        s2_enabled: true,
        s2_table_base: ttb,
        s2_granule: 12,
        vmid: 3,
        ..StreamTableEntry::default()
    };
    smmu.configure_stream(1, ste);
    smmu.enable();

    // 仅阶段2：虚拟地址按中间物理地址直接走阶段2页表
    let result = smmu.translate(0x6000, 1, 0, 3);
    assert!(result.success, "{}", result.fault_reason);
    assert_eq!(result.physical_addr, 0x30_0000);
    assert_eq!(smmu.get_stats().page_table_walks, 1);
}

#[test]
fn nested_two_stage_translation() {
    let (mut smmu, memory) = setup();
    // 阶段1: va 0x1000 -> ipa 0x5000；阶段2: ipa 0x5000 -> pa 0x20_3000
    let s1_ttb = build_4k_mapping(&memory, 0x1000, 0x5000);
    let s2_ttb = build_4k_mapping(&memory, 0x5000, 0x20_3000);

    let ste = StreamTableEntry {
        valid: true,
        s1_enabled: true,
        s2_enabled: true,
        s2_table_base: s2_ttb,
        s2_granule: 12,
        vmid: 2,
        ..StreamTableEntry::default()
    };
    smmu.configure_stream(0, ste);
    smmu.configure_context(0, 1, context_with_table(1, s1_ttb));
    smmu.enable();

    let result = smmu.translate(0x1000, 0, 1, 2);
    assert!(result.success, "{}", result.fault_reason);
    assert_eq!(result.physical_addr, 0x20_3000);
    // 两个阶段各遍历一次
    assert_eq!(smmu.get_stats().page_table_walks, 2);

    // 回填后命中，不再遍历
    let again = smmu.translate(0x1000, 0, 1, 2);
    assert!(again.success);
    assert_eq!(smmu.get_stats().page_table_walks, 2);
    assert_eq!(smmu.get_stats().tlb_hits, 1);
}

#[test]
fn stage2_walk_failure_emits_event() {
    let (mut smmu, memory) = setup();
    let s1_ttb = build_4k_mapping(&memory, 0x1000, 0x5000);
    // 阶段2页表只映射别的中间物理地址
    let s2_ttb = build_4k_mapping(&memory, 0x9000, 0x20_3000);

    let ste = StreamTableEntry {
        valid: true,
        s1_enabled: true,
        s2_enabled: true,
        s2_table_base: s2_ttb,
        s2_granule: 12,
        vmid: 2,
        ..StreamTableEntry::default()
    };
    smmu.configure_stream(0, ste);
    smmu.configure_context(0, 1, context_with_table(1, s1_ttb));
    smmu.enable();

    let result = smmu.translate(0x1000, 0, 1, 2);
    assert!(!result.success);
    assert_eq!(result.fault_reason, "Translation fault: invalid descriptor");

    let event = smmu.pop_event().expect("expected fault event");
    // 阶段2故障记录中间物理地址与 STE 的 VMID
    assert_eq!(event.va, 0x5000);
    assert_eq!(event.vmid, 2);
    assert_eq!(smmu.get_stats().page_table_walks, 2);
}

#[test]
fn invalidate_shortcuts_affect_tlb() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);
    add_4k_mapping(&memory, ttb, 0x3000, 0x103000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    smmu.translate(0x1000, 0, 1, 0);
    smmu.translate(0x3000, 0, 1, 0);

    // 按虚拟地址失效只影响目标页
    smmu.invalidate_tlb_by_va(0x1000, 1);
    smmu.translate(0x3000, 0, 1, 0);
    assert_eq!(smmu.get_stats().tlb_hits, 1);
    smmu.translate(0x1000, 0, 1, 0);
    assert_eq!(smmu.get_stats().page_table_walks, 3);

    // 按流失效清空该设备的所有条目
    smmu.invalidate_tlb_by_stream(0);
    smmu.translate(0x1000, 0, 1, 0);
    assert_eq!(smmu.get_stats().page_table_walks, 4);
}

#[test]
fn invalidate_commands_cover_effect_table() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    let commands = [
        Command::Sync,
        Command::PrefetchConfig { stream_id: 0 },
        Command::PrefetchAddr { stream_id: 0, va: 0x1000 },
        Command::InvalidateStreamConfig { stream_id: 0 },
        Command::InvalidateContext { stream_id: 0, asid: 1 },
        Command::InvalidateAllConfig,
        Command::InvalidateAllTlb,
        Command::InvalidateByAsid { asid: 1 },
        Command::InvalidateByVa { va: 0x1000, asid: 1 },
        Command::InvalidateByVmid { vmid: 0 },
    ];

    for cmd in commands {
        smmu.translate(0x1000, 0, 1, 0);
        smmu.submit_command(cmd);
        smmu.process_commands();
    }

    assert_eq!(smmu.get_stats().commands_processed, commands.len() as u64);
    // 每条失效命令后的转换都需要重新遍历；Sync/预取不清缓存
    let stats = smmu.get_stats();
    assert_eq!(stats.page_table_walks, 7);
    assert_eq!(stats.tlb_hits, 3);
}

#[test]
fn fault_counter_matches_events_without_overflow() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();

    // 三类失败路径各触发一次
    smmu.translate(0x1000, 9, 1, 0); // 无效流表项
    smmu.translate(0x1000, 0, 8, 0); // 无效上下文描述符
    smmu.translate(0x10_0000, 0, 1, 0); // 无效描述符

    let stats = smmu.get_stats();
    assert_eq!(stats.translation_faults, 3);
    assert_eq!(stats.events_generated, 3);

    let mut drained = 0;
    while smmu.pop_event().is_some() {
        drained += 1;
    }
    assert_eq!(drained, 3);
}

#[test]
fn disable_stops_translation_without_events() {
    let (mut smmu, memory) = setup();
    let ttb = build_4k_mapping(&memory, 0x1000, 0x101000);

    smmu.configure_stream(0, stage1_stream());
    smmu.configure_context(0, 1, context_with_table(1, ttb));
    smmu.enable();
    assert!(smmu.translate(0x1000, 0, 1, 0).success);

    smmu.disable();
    let result = smmu.translate(0x1000, 0, 1, 0);
    assert!(!result.success);
    assert_eq!(result.fault_reason, "SMMU is disabled");
    assert!(!smmu.has_events());
}
