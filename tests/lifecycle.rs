use std::io;
use std::sync::{Arc, Mutex, Once};

use pseud_driver::{
    Acquire, Attribute, DeviceError, Driver, DriverConfig, Whence, MAX_DEVICES, PAGE_SIZE,
};
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("pseud_driver=debug"))
            .with_test_writer()
            .try_init();
    });
}

fn empty_driver() -> Driver {
    Driver::init(DriverConfig {
        devices: vec![],
        ..DriverConfig::default()
    })
    .unwrap()
}

#[test]
fn unregistered_live_releasing_unregistered() {
    init_logging();
    let driver = empty_driver();

    // Unregistered: nothing answers for the id.
    assert_eq!(driver.open(4).unwrap_err(), DeviceError::NotFound { id: 4 });
    assert_eq!(driver.remove(4).unwrap_err(), DeviceError::NotRegistered { id: 4 });

    // Live: every operation is available.
    let device = driver.create(4).unwrap();
    assert_eq!(device.node_name(), "pseud_4");
    let mut session = driver.open(4).unwrap();
    session.write(b"live", Acquire::Blocking).unwrap();
    session.seek(0, Whence::Start).unwrap();
    driver.attr_store(4, Attribute::Address, "1").unwrap();
    assert_eq!(driver.attr_show(4, Attribute::Value).unwrap(), format!("{}\n", b'i'));
    let map = session.mmap(PAGE_SIZE, 0).unwrap();

    // Releasing: the id is gone from the registry even with a session and mapping outstanding.
    driver.remove(4).unwrap();
    assert!(!driver.registry().is_live(4));
    assert_eq!(
        driver.attr_show(4, Attribute::Value).unwrap_err(),
        DeviceError::NotFound { id: 4 }
    );

    // The outstanding handles keep working on the detached instance.
    let mut buf = [0u8; 4];
    session.read(&mut buf, Acquire::Blocking).unwrap();
    assert_eq!(&buf, b"live");
    assert_eq!(map.load(0).unwrap(), b'l');

    // Unregistered again: the id can be reused and starts from zeroed memory.
    let fresh = driver.create(4).unwrap();
    assert!(fresh.snapshot().iter().all(|b| *b == 0));
    assert_eq!(map.load(0).unwrap(), b'l', "old mapping does not alias the new instance");
}

#[test]
fn ids_fill_the_whole_bitmap() {
    init_logging();
    let driver = empty_driver();
    for expected in 0..MAX_DEVICES as u32 {
        assert_eq!(driver.create_next().unwrap().id(), expected);
    }
    assert_eq!(
        driver.create_next().unwrap_err(),
        DeviceError::InvalidArgument("no free device id")
    );

    driver.remove(17).unwrap();
    assert_eq!(driver.create_next().unwrap().id(), 17);
}

#[test]
fn narrow_registry_rejects_high_ids() {
    init_logging();
    let driver = Driver::init(DriverConfig {
        max_devices: 4,
        devices: vec![0, 3],
        ..DriverConfig::default()
    })
    .unwrap();
    assert!(matches!(driver.create(4), Err(DeviceError::InvalidArgument(_))));
    assert_eq!(driver.create_next().unwrap().id(), 1);
}

#[test]
fn close_is_idempotent_and_final() {
    init_logging();
    let driver = Driver::init(DriverConfig::default()).unwrap();
    let mut session = driver.open(0).unwrap();
    session.close();
    session.close();
    assert_eq!(
        session.write(b"x", Acquire::Blocking),
        Err(DeviceError::NotFound { id: 0 })
    );
    assert_eq!(session.llseek(0, 0), Err(DeviceError::NotFound { id: 0 }));
}

#[test]
fn exit_tears_down_with_sessions_outstanding() {
    init_logging();
    let driver = Driver::init(DriverConfig::default()).unwrap();
    let mut session = driver.open(2).unwrap();
    driver.exit();

    assert_eq!(session.write(b"after exit", Acquire::Blocking).unwrap(), 10);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn teardown_warns_for_every_device_left_behind() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let guard = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("pseud_driver=warn"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .set_default();

    let driver = Driver::init(DriverConfig {
        devices: vec![0, 1, 2],
        ..DriverConfig::default()
    })
    .unwrap();
    let _session = driver.open(1).unwrap();
    driver.exit();
    drop(guard);

    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert_eq!(text.matches("device still present at teardown").count(), 3, "{text}");
    assert!(text.contains("device=pseud_1 handles=1"), "{text}");
    assert!(text.contains("device=pseud_0 handles=0"), "{text}");
}
