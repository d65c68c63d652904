use std::sync::Arc;

use proptest::prelude::*;
use pseud_mem::{BoundedBuffer, BufferError, MappedRegion, PAGE_SIZE};

#[test]
fn concurrent_writes_to_disjoint_ranges() {
    let buffer = Arc::new(BoundedBuffer::new(8 * PAGE_SIZE).unwrap());

    let mut threads = Vec::new();
    for i in 0..8usize {
        let buffer = buffer.clone();
        threads.push(std::thread::spawn(move || {
            buffer.write_from(i * PAGE_SIZE, &vec![i as u8; PAGE_SIZE]).unwrap();
        }));
    }

    for t in threads {
        t.join().expect("thread panicked");
    }

    let mut page = vec![0u8; PAGE_SIZE];
    for i in 0..8usize {
        buffer.read_into(i * PAGE_SIZE, &mut page).unwrap();
        assert!(page.iter().all(|b| *b == i as u8));
    }
}

#[test]
fn every_page_of_a_multi_page_buffer_is_mappable() {
    let buffer = Arc::new(BoundedBuffer::new(4 * PAGE_SIZE).unwrap());
    for page in 0..4 {
        let map = MappedRegion::new(buffer.clone(), page * PAGE_SIZE, PAGE_SIZE).unwrap();
        map.store(0, page as u8 + 1).unwrap();
    }
    for page in 0..4 {
        assert_eq!(buffer.load(page * PAGE_SIZE).unwrap(), page as u8 + 1);
    }
}

const CAPACITY: usize = 1024;

proptest! {
    #[test]
    fn write_then_read_returns_the_same_bytes(
        offset in 0usize..CAPACITY,
        data in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let buffer = BoundedBuffer::new(CAPACITY).unwrap();
        let fits = offset + data.len() <= CAPACITY;

        let res = buffer.write_from(offset, &data);
        prop_assert_eq!(res.is_ok(), fits);

        if fits {
            let mut dst = vec![0u8; data.len()];
            buffer.read_into(offset, &mut dst).unwrap();
            prop_assert_eq!(dst, data);
        } else {
            let is_out_of_range = matches!(res, Err(BufferError::OutOfRange { .. }));
            prop_assert!(is_out_of_range);
            prop_assert!(buffer.to_vec().iter().all(|b| *b == 0));
        }
    }
}
