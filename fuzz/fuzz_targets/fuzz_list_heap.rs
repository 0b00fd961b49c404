#![no_main]

use defrag_heap::{DefragPointer, ListHeap};

use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Action {
    /// Allocate `size` bytes and scribble a tag through the handle
    Alloc { size: u16 },
    /// Free the ith live allocation
    Free { index: u8 },
    /// Duplicate the ith live allocation's handle
    Duplicate { index: u8 },
    /// Run one defragmentation step
    Iterate,
    /// Defragment to convergence
    FullDefrag,
}

fuzz_target!(|actions: Vec<Action>| {
    let mut heap = ListHeap::new(1 << 16);
    let mut live: Vec<(DefragPointer, u8, usize)> = vec![];

    for (round, action) in actions.into_iter().enumerate() {
        let tag = round as u8;
        match action {
            Action::Alloc { size } => {
                let size = size as usize;
                if size == 0 {
                    assert!(heap.allocate(0).is_null());
                    continue;
                }

                let ptr = heap.allocate(size);
                if !ptr.is_null() {
                    unsafe { ptr.get().write_bytes(tag, size) };
                    live.push((ptr, tag, size));
                }
            }
            Action::Free { index } => {
                if live.is_empty() {
                    continue;
                }
                let i = index as usize % live.len();
                let (mut ptr, ..) = live.swap_remove(i);
                heap.free(&mut ptr);
                assert!(ptr.is_null());
            }
            Action::Duplicate { index } => {
                if live.is_empty() {
                    continue;
                }
                let i = index as usize % live.len();
                let (ptr, tag, size) = &mut live[i];
                let dup = ptr.duplicate();
                assert_eq!(dup.get(), ptr.get());
                let (tag, size) = (*tag, *size);
                live.push((dup, tag, size));
            }
            Action::Iterate => {
                heap.iterate_defrag();
            }
            Action::FullDefrag => {
                heap.full_defrag();
                assert!(heap.is_fully_defragmented());
                assert_eq!(heap.fragmentation_ratio(), 0.0);
            }
        }

        // Freeing through one handle detaches its duplicates too.
        live.retain(|(ptr, ..)| !ptr.is_null());

        // Every live handle still reads back its own bytes.
        for (ptr, tag, size) in &live {
            let p = ptr.get();
            for off in [0, size / 2, size - 1] {
                assert_eq!(unsafe { p.add(off).read() }, *tag);
            }
        }
    }
});
