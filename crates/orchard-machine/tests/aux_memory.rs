mod common;

use orchard_machine_constants::softswitch as sw;
use pretty_assertions::assert_eq;

const IO: u32 = 0xC000;

#[test]
fn altzp_switches_zero_page_and_stack_to_aux() {
    let mut machine = common::machine();

    machine.write8(0x0080, 0x11); // zero page, main
    machine.write8(0x0180, 0x22); // stack, main

    machine.write8(IO + sw::ALTZP_ON as u32, 0);
    // Aux memory starts out clear; main bytes are hidden.
    assert_eq!(machine.read8(0x0080), 0x00);
    assert_eq!(machine.read8(0x0180), 0x00);

    machine.write8(0x0080, 0xAA);
    machine.write8(0x0180, 0xBB);

    machine.write8(IO + sw::ALTZP_OFF as u32, 0);
    assert_eq!(machine.read8(0x0080), 0x11);
    assert_eq!(machine.read8(0x0180), 0x22);

    machine.write8(IO + sw::ALTZP_ON as u32, 0);
    assert_eq!(machine.read8(0x0080), 0xAA);
    assert_eq!(machine.read8(0x0180), 0xBB);
}

#[test]
fn altzp_does_not_touch_the_rest_of_page_zero() {
    let mut machine = common::machine();
    machine.write8(0x0300, 0x77);
    machine.write8(IO + sw::ALTZP_ON as u32, 0);
    assert_eq!(machine.read8(0x0300), 0x77);
}

#[test]
fn text_page_follows_store80_and_page2() {
    let mut machine = common::machine();
    machine.write8(0x0400, 0x41);

    // PAGE2 alone does nothing without 80STORE.
    machine.read8(IO + sw::PAGE2_ON as u32);
    assert_eq!(machine.read8(0x0400), 0x41);

    machine.write8(IO + sw::STORE80_ON as u32, 0);
    assert_eq!(machine.read8(0x0400), 0x00); // aux text page

    machine.write8(0x0400, 0x61);
    machine.read8(IO + sw::PAGE2_OFF as u32);
    assert_eq!(machine.read8(0x0400), 0x41); // back to main

    machine.read8(IO + sw::PAGE2_ON as u32);
    assert_eq!(machine.read8(0x0400), 0x61);
}

#[test]
fn ramrd_ramwrt_flags_are_carried_but_route_to_main() {
    // The general-RAM select lines latch and read back, but the page-0
    // composite keeps routing those windows to main memory.
    let mut machine = common::machine();
    machine.write8(0x0900, 0x5A);

    machine.write8(IO + sw::RAMRD_ON as u32, 0);
    machine.write8(IO + sw::RAMWRT_ON as u32, 0);
    assert_eq!(machine.read8(IO + sw::RDRAMRD as u32), 0x80);
    assert_eq!(machine.read8(IO + sw::RDRAMWRT as u32), 0x80);

    assert!(machine.switches().aux.borrow().is_aux_read_enabled());
    assert!(machine.switches().aux.borrow().is_aux_write_enabled());

    // Still main memory.
    assert_eq!(machine.read8(0x0900), 0x5A);
    machine.write8(0x0900, 0x5B);
    machine.write8(IO + sw::RAMRD_OFF as u32, 0);
    machine.write8(IO + sw::RAMWRT_OFF as u32, 0);
    assert_eq!(machine.read8(0x0900), 0x5B);
}

#[test]
fn sub_region_tags_classify_page_zero() {
    use memory::{RegionTag, Target as _};

    let machine = common::machine();
    let entry = machine.bus.page_entry(0x0000).unwrap();
    let target = entry.target.as_ref().unwrap();
    let t = target.borrow();
    assert_eq!(t.sub_region_tag(0x0010), Some(RegionTag::ZeroPage));
    assert_eq!(t.sub_region_tag(0x0110), Some(RegionTag::Stack));
    assert_eq!(t.sub_region_tag(0x0410), Some(RegionTag::Video));
    assert_eq!(t.sub_region_tag(0x0A00), Some(RegionTag::Ram));
}
