use mica::{Region, TxError};
use std::sync::Arc;
use std::thread;

fn word(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

#[test]
fn single_thread_sanity() {
    let region = Region::new(16, 8).unwrap();

    let mut tx = region.begin(false);
    tx.write(&word(0xCAFEBABE), region.start()).unwrap();
    tx.commit().unwrap();

    let mut tx = region.begin(true);
    let mut buf = [0u8; 8];
    tx.read(region.start(), &mut buf).unwrap();
    tx.commit().unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0xCAFEBABE);
}

#[test]
fn read_your_own_writes() {
    let region = Region::new(16, 8).unwrap();
    let a0 = region.start();
    let mut buf = [0u8; 8];

    let mut tx = region.begin(false);
    tx.write(&word(0x1), a0).unwrap();
    tx.read(a0, &mut buf).unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0x1); // visible before commit

    // A second write to the same address replaces the first.
    tx.write(&word(0x2), a0).unwrap();
    tx.read(a0, &mut buf).unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0x2);
    tx.commit().unwrap();

    let mut tx = region.begin(true);
    tx.read(a0, &mut buf).unwrap();
    tx.commit().unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0x2);
}

#[test]
fn stale_read_set_aborts_commit() {
    let region = Region::new(16, 8).unwrap();
    let a0 = region.start();
    let a8 = region.start() + 8;
    let mut buf = [0u8; 8];

    // A reads a0 and stays open.
    let mut t_a = region.begin(false);
    t_a.read(a0, &mut buf).unwrap();

    // B commits a new value for a0 in the meantime.
    let mut t_b = region.begin(false);
    t_b.write(&word(7), a0).unwrap();
    t_b.commit().unwrap();

    // A's snapshot is stale now; its commit must fail even though it
    // writes a different word.
    t_a.write(&word(1), a8).unwrap();
    assert_eq!(t_a.commit(), Err(TxError::Abort));

    // The abort left no trace at a8.
    let mut check = region.begin(true);
    check.read(a8, &mut buf).unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0);
}

#[test]
fn read_only_snapshot_is_pinned_at_begin() {
    let region = Region::new(16, 8).unwrap();
    let a0 = region.start();

    let mut ro = region.begin(true);

    let mut rw = region.begin(false);
    rw.write(&word(3), a0).unwrap();
    rw.commit().unwrap();

    // The committed value postdates the snapshot; the reader aborts
    // rather than observing it, and stays aborted through commit.
    let mut buf = [0u8; 8];
    assert_eq!(ro.read(a0, &mut buf), Err(TxError::Abort));
    assert_eq!(ro.commit(), Err(TxError::Abort));
}

#[test]
fn disjoint_writers_both_commit() {
    let region = Arc::new(Region::new(16, 8).unwrap());

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let region = region.clone();
            thread::spawn(move || {
                let addr = region.start() + i * 8;
                region
                    .atomically(|tx| tx.write(&word(i as u64 + 1), addr))
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let (v0, v1) = region
        .snapshot(|tx| {
            let mut buf = [0u8; 16];
            tx.read(region.start(), &mut buf)?;
            Ok((
                u64::from_le_bytes(buf[..8].try_into().unwrap()),
                u64::from_le_bytes(buf[8..].try_into().unwrap()),
            ))
        })
        .unwrap();
    assert_eq!((v0, v1), (1, 2));
}

#[test]
fn multi_word_transfers_copy_every_word() {
    let region = Region::new(32, 8).unwrap();
    let start = region.start();
    let payload: Vec<u8> = (0u8..32).collect();

    region.atomically(|tx| tx.write(&payload, start)).unwrap();

    let mut buf = [0u8; 32];
    region.snapshot(|tx| tx.read(start, &mut buf)).unwrap();
    assert_eq!(buf[..], payload[..]);
}

#[test]
fn alloc_and_free_round_trip() {
    let region = Region::new(16, 8).unwrap();

    let seg = region.atomically(|tx| tx.alloc(32)).unwrap();
    region.atomically(|tx| tx.write(&word(11), seg + 24)).unwrap();

    let got = region
        .snapshot(|tx| {
            let mut buf = [0u8; 8];
            tx.read(seg + 24, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        })
        .unwrap();
    assert_eq!(got, 11);

    region.atomically(|tx| tx.free(seg)).unwrap();

    // Retired segments cannot be freed twice.
    let mut tx = region.begin(false);
    assert_eq!(tx.free(seg), Err(TxError::Abort));
}

#[test]
fn atomically_retries_until_it_wins() {
    let region = Arc::new(Region::new(16, 8).unwrap());
    let a0 = region.start();

    // Two threads funnel 100 increments each through the same word; every
    // conflict aborts and retries inside atomically.
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let region = region.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    region
                        .atomically(|tx| {
                            let mut buf = [0u8; 8];
                            tx.read(a0, &mut buf)?;
                            let v = u64::from_le_bytes(buf) + 1;
                            tx.write(&word(v), a0)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = region
        .snapshot(|tx| {
            let mut buf = [0u8; 8];
            tx.read(a0, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        })
        .unwrap();
    assert_eq!(total, 200);
}
