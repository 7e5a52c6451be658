#![cfg(target_os = "linux")]

mod common;

use common::{create_config, mqueue_supported, recorder, settle, QueueGuard};
use nix::errno::Errno;
use pmq_notify::{EventLoop, MessageQueue, OpenConfig, QueueError, QueueEvent};

#[test]
fn send_receive_scenario() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_t3");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 1, 16))?;

    assert!(queue.send(b"hi", 3)?);
    assert_eq!(queue.cached_attributes().current_messages, 1);
    assert_eq!(queue.current_messages()?, 1);
    assert!(queue.is_full()?);

    let mut buf = [0u8; 16];
    assert_eq!(queue.receive_with_priority(&mut buf)?, Some((2, 3)));
    assert_eq!(&buf[..2], b"hi");
    assert_eq!(queue.cached_attributes().current_messages, 0);
    assert!(!queue.is_full()?);

    queue.close()?;
    Ok(())
}

#[test]
fn round_trip_preserves_payload_and_priority() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_round_trip");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 4, 64))?;

    let mut buf = vec![0u8; queue.message_size_limit()?];
    let payloads: [(&[u8], u32); 4] = [
        (b"", 0),
        (b"\x00\xffbinary\x01", 7),
        (&[b'z'; 64], 16),
        (b"top band", 31),
    ];
    for (payload, priority) in payloads {
        assert!(queue.send(payload, priority)?);
        let (len, got_priority) = queue
            .receive_with_priority(&mut buf)?
            .expect("message should be queued");
        assert_eq!(&buf[..len], payload);
        assert_eq!(got_priority, priority);
    }

    queue.close()?;
    Ok(())
}

#[test]
fn higher_priority_is_delivered_first() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_priority");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 4, 16))?;

    assert!(queue.send(b"low", 1)?);
    assert!(queue.send(b"high", 5)?);

    let mut buf = [0u8; 16];
    let (len, priority) = queue.receive_with_priority(&mut buf)?.unwrap();
    assert_eq!((&buf[..len], priority), (&b"high"[..], 5));
    assert_eq!(queue.receive(&mut buf)?, Some(3));
    assert_eq!(&buf[..3], b"low");

    queue.close()?;
    Ok(())
}

#[test]
fn full_queue_reports_backpressure() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_backpressure");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 1, 16))?;

    assert!(queue.send(b"one", 0)?);
    assert!(!queue.send(b"two", 0)?);
    assert_eq!(queue.current_messages()?, 1);

    queue.close()?;
    Ok(())
}

#[test]
fn empty_queue_yields_no_message() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_empty");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 2, 16))?;

    let mut buf = [0u8; 16];
    assert_eq!(queue.receive(&mut buf)?, None);
    assert_eq!(queue.receive_with_priority(&mut buf)?, None);

    queue.close()?;
    Ok(())
}

#[test]
fn unlink_after_close() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_t1");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 2, 16))?;
    queue.close()?;

    assert_eq!(queue.name(), Some(guard.name.as_str()));
    queue.unlink()?;
    assert!(queue.name().is_none());
    assert!(matches!(queue.unlink(), Err(QueueError::NothingToUnlink)));

    // Gone from the namespace.
    let reopen = queue.open(&OpenConfig::new(&guard.name));
    assert_eq!(reopen.unwrap_err().errno(), Some(Errno::ENOENT));
    Ok(())
}

#[test]
fn exclusive_create_conflicts() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_t2");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    let config = create_config(&guard.name, 2, 16).exclusive();

    queue.open(&config)?;
    let err = queue.open(&config).unwrap_err();
    assert!(err.is_lifecycle());
    assert_eq!(err.errno(), Some(Errno::EEXIST));
    assert!(!queue.is_open());
    assert_eq!(event_loop.live_registrations(), 0);
    Ok(())
}

#[test]
fn opening_missing_queue_fails_closed() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_missing");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);

    let err = queue.open(&OpenConfig::new(&guard.name)).unwrap_err();
    assert_eq!(err.errno(), Some(Errno::ENOENT));
    assert!(!queue.is_open());
    assert!(queue.name().is_none());
    assert!(!queue.listener_captured());
    assert!(matches!(queue.close(), Err(QueueError::AlreadyClosed)));
    Ok(())
}

#[test]
fn double_close_is_an_error() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_double_close");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 2, 16))?;

    queue.close()?;
    assert!(matches!(queue.close(), Err(QueueError::AlreadyClosed)));
    assert!(matches!(queue.current_messages(), Err(QueueError::NotOpen)));
    Ok(())
}

#[test]
fn validation_errors_do_not_touch_state() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_validation");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);
    queue.open(&create_config(&guard.name, 2, 16))?;

    let mut small = [0u8; 8];
    assert!(matches!(
        queue.receive(&mut small),
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        queue.send(&[0u8; 17], 0),
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        queue.send(b"x", 32),
        Err(QueueError::Validation(_))
    ));
    assert!(queue.is_open());
    assert_eq!(queue.current_messages()?, 0);

    queue.close()?;
    Ok(())
}

#[test]
fn reopen_under_a_new_name() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let first = QueueGuard::new("pmq_first");
    let second = QueueGuard::new("pmq_second");
    let event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);

    queue.open(&create_config(&first.name, 2, 16))?;
    assert!(queue.send(b"first", 0)?);

    // Open implicitly closes the previous descriptor.
    queue.open(&create_config(&second.name, 3, 32))?;
    assert_eq!(queue.name(), Some(second.name.as_str()));
    assert_eq!(queue.max_messages()?, 3);
    assert_eq!(queue.message_size_limit()?, 32);
    assert_eq!(queue.current_messages()?, 0);
    assert_eq!(event_loop.live_registrations(), 1);
    assert_eq!(event_loop.pending_teardowns(), 1);

    queue.unlink()?;
    assert!(MessageQueue::unlink_by_name(&second.name).is_err());

    // The first queue still exists and still holds its message.
    queue.open(&OpenConfig::new(&first.name))?;
    assert_eq!(queue.current_messages()?, 1);
    queue.close()?;
    Ok(())
}

#[test]
fn listener_is_captured_once() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_capture");
    let mut event_loop = EventLoop::new()?;
    let mut queue = MessageQueue::new(&event_loop);

    let (first_log, first) = recorder();
    let (second_log, second) = recorder();
    queue.set_listener(first)?;
    queue.open(&create_config(&guard.name, 2, 16))?;
    assert!(queue.listener_captured());
    queue.close()?;

    assert!(matches!(
        queue.set_listener(second),
        Err(QueueError::Validation(_))
    ));

    queue.open(&OpenConfig::new(&guard.name))?;
    settle(&mut event_loop, 3);
    assert_eq!(*first_log.borrow(), vec![QueueEvent::Drain]);
    assert!(second_log.borrow().is_empty());

    queue.close()?;
    Ok(())
}

#[test]
fn drop_closes_the_descriptor() -> anyhow::Result<()> {
    if !mqueue_supported() {
        return Ok(());
    }
    let guard = QueueGuard::new("pmq_drop");
    let mut event_loop = EventLoop::new()?;
    {
        let mut queue = MessageQueue::new(&event_loop);
        queue.open(&create_config(&guard.name, 2, 16))?;
        assert_eq!(event_loop.live_registrations(), 1);
    }
    assert_eq!(event_loop.live_registrations(), 0);
    assert_eq!(event_loop.pending_teardowns(), 1);

    settle(&mut event_loop, 1);
    assert_eq!(event_loop.pending_teardowns(), 0);
    Ok(())
}
