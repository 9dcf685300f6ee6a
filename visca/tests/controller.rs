//! End-to-end tests against a simulated camera.
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
    time::Instant,
};
use visca::{
    protocol::{unpack_signed_nibbles, Address, Command, Inquiry, LimitsTable, Param},
    DispatcherConfig, EntryState, Error, Result, ViscaController,
};

fn h(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

/// Reads one frame sent by the controller.
async fn read_frame(camera: &mut DuplexStream) -> Vec<u8> {
    let mut o = Vec::new();
    loop {
        let b = camera.read_u8().await.unwrap();
        o.push(b);
        if b == 0xff {
            return o;
        }
    }
}

async fn reply(camera: &mut DuplexStream, s: &str) {
    camera.write_all(&h(s)).await.unwrap();
}

fn setup(config: DispatcherConfig) -> (ViscaController, DuplexStream) {
    let (link, camera) = duplex(256);
    (ViscaController::new(link, config), camera)
}

#[tokio::test(start_paused = true)]
async fn zoom_direct() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let limits = LimitsTable::builtin().get("ZoomPosition")?;
    let completed = Arc::new(AtomicUsize::new(0));

    let mut zoom = Command::with_bytes(Address::camera(1)?, &[0x04, 0x47])?;
    let position = zoom.push_param(Param::word(0, limits)?)?;
    let c = completed.clone();
    zoom.set(position, 0x1234)?.on_completion(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let handle = controller.submit(zoom.clone())?;
    assert_eq!(h("8101044701020304ff"), read_frame(&mut camera).await);
    reply(&mut camera, "9041ff").await;
    reply(&mut camera, "9051ff").await;
    handle.outcome().await?;
    assert_eq!(1, completed.load(Ordering::SeqCst));

    // Out of range values never reach the wire
    assert!(zoom.set(position, 0x4001).is_err());
    zoom.set(position, 0x4000)?;
    let handle = controller.submit(zoom)?;
    assert_eq!(h("8101044704000000ff"), read_frame(&mut camera).await);
    reply(&mut camera, "9042ff9052ff").await;
    assert_eq!(2, handle.outcome().await?.socket);
    assert_eq!(2, completed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn socket_limit() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let tele = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x02])?;

    let a = controller.submit(tele.clone())?;
    let b = controller.submit(tele.clone())?;
    let c = controller.submit(tele)?;
    read_frame(&mut camera).await;
    read_frame(&mut camera).await;
    reply(&mut camera, "9041ff9042ff").await;

    // Give the controller plenty of time to (wrongly) send the third
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(EntryState::Acked, a.status());
    assert_eq!(EntryState::Acked, b.status());
    assert_eq!(EntryState::Queued, c.status());

    reply(&mut camera, "9051ff").await;
    assert_eq!(h("8101040702ff"), read_frame(&mut camera).await);
    a.outcome().await?;
    assert_eq!(EntryState::Sent, c.status());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pan_tilt_inquiry() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let limits = LimitsTable::builtin();
    let pan_limits = limits.get("PanPosition")?;
    let position = Arc::new(Mutex::new(None));
    let p = position.clone();

    // CAM_PanTiltPosInq
    let inq = Inquiry::new(
        Address::camera(1)?,
        &[0x06, 0x12],
        move |b| {
            if b.len() != 8 {
                return Err(visca::protocol::Error::InvalidLength);
            }
            let pan = pan_limits.clamp(unpack_signed_nibbles(&b[..4])?.into());
            let tilt = unpack_signed_nibbles(&b[4..])?;
            Ok((pan, tilt))
        },
        move |v| *p.lock().unwrap() = Some(v),
    )?;

    let handle = controller.submit(inq)?;
    assert_eq!(h("81090612ff"), read_frame(&mut camera).await);
    reply(&mut camera, "90500f0f0f0e00000100ff").await;
    assert_eq!(8, handle.outcome().await?.data.len());
    assert_eq!(Some((-2, 0x10)), *position.lock().unwrap());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn device_error() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let cmd = Command::with_bytes(Address::camera(2)?, &[0x04, 0x07, 0x02])?;

    let handle = controller.submit(cmd)?;
    assert_eq!(h("8201040702ff"), read_frame(&mut camera).await);
    reply(&mut camera, "a06041ff").await;

    let e = handle.outcome().await.unwrap_err();
    assert!(matches!(e, Error::Device(0x41)));

    // Nothing else is sent
    let r = tokio::time::timeout(Duration::from_secs(10), camera.read_u8()).await;
    assert!(r.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_and_retry() -> Result {
    let config = DispatcherConfig::default()
        .with_ack_timeout(Duration::from_millis(50))
        .with_retry_limit(1);
    let (controller, mut camera) = setup(config);
    let cmd = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x02])?;

    let handle = controller.submit(cmd)?;
    let first = read_frame(&mut camera).await;
    let start = Instant::now();
    assert_eq!(first, read_frame(&mut camera).await);
    assert!(start.elapsed() >= Duration::from_millis(50));

    assert!(matches!(handle.outcome().await, Err(Error::Timeout)));
    let r = tokio::time::timeout(Duration::from_secs(1), camera.read_u8()).await;
    assert!(r.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel() -> Result {
    let config = DispatcherConfig::default().with_max_sockets(1);
    let (controller, mut camera) = setup(config);
    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    let mut first = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x02])?;
    first.on_completion(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let second = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x03])?;
    let third = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x00])?;

    let sent = controller.submit(first)?;
    let queued = controller.submit(second)?;
    let last = controller.submit(third)?;
    assert_eq!(h("8101040702ff"), read_frame(&mut camera).await);

    controller.cancel(&queued)?;
    controller.cancel(&sent)?;
    assert!(matches!(queued.outcome().await, Err(Error::Cancelled)));
    assert!(matches!(sent.outcome().await, Err(Error::Cancelled)));

    // The device still answers the cancelled command
    reply(&mut camera, "9041ff9051ff").await;
    assert_eq!(h("8101040700ff"), read_frame(&mut camera).await);
    reply(&mut camera, "9041ff9051ff").await;
    last.outcome().await?;
    assert_eq!(0, completed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn link_failure() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let cmd = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x02])?;

    let a = controller.submit(cmd.clone())?;
    let b = controller.submit(cmd.clone())?;
    let queued = controller.submit(cmd)?;
    read_frame(&mut camera).await;
    read_frame(&mut camera).await;
    drop(camera);

    assert!(matches!(a.outcome().await, Err(Error::Transport(_))));
    assert!(matches!(b.outcome().await, Err(Error::Transport(_))));
    assert!(matches!(queued.outcome().await, Err(Error::Disconnected)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn drop_controller() -> Result {
    let (controller, mut camera) = setup(DispatcherConfig::default());
    let cmd = Command::with_bytes(Address::camera(1)?, &[0x04, 0x07, 0x02])?;

    // Outstanding messages still finish
    let handle = controller.submit(cmd)?;
    drop(controller);
    read_frame(&mut camera).await;
    reply(&mut camera, "9041ff9051ff").await;
    handle.outcome().await?;

    // Then the link is closed
    let mut b = [0; 1];
    assert_eq!(0, camera.read(&mut b).await?);
    Ok(())
}
