//! # pmq - Main Entry Point
//!
//! Command-line front end for the `pmq-notify` library:
//!
//! 1. **Initialize logging**: colourised `tracing` output on stderr
//! 2. **Parse arguments**: subcommand plus optional `--config` JSON file
//! 3. **Run the subcommand** against a `MessageQueue` bound to a local
//!    `EventLoop`
//!
//! A typical session mirrors the classic fill-then-drain demo:
//!
//! ```text
//! pmq create /pmqtest --mode 0777
//! pmq send /pmqtest --fill
//! pmq watch /pmqtest --unlink
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use pmq_notify::{
    cli::{Args, Command, CreateArgs, InfoArgs, ReceiveArgs, SendArgs, WatchArgs},
    logging,
    utils::{display_payload, format_bytes, random_printable_byte},
    EventLoop, MessageQueue, QueueAttributes, QueueEvent,
};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);
    debug!("Arguments: {:?}", args);

    let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

    match &args.command {
        Command::Create(create) => run_create(&args, create, &event_loop),
        Command::Send(send) => run_send(&args, send, &event_loop),
        Command::Receive(receive) => run_receive(&args, receive, &event_loop),
        Command::Watch(watch) => run_watch(&args, watch, &mut event_loop),
        Command::Info(info) => run_info(&args, info, &event_loop),
        Command::Unlink(queue) => {
            MessageQueue::unlink_by_name(&queue.name)
                .with_context(|| format!("Failed to unlink '{}'", queue.name))?;
            info!("Unlinked {}", queue.name);
            Ok(())
        }
    }
}

fn open_existing(args: &Args, name: &str, event_loop: &EventLoop) -> Result<MessageQueue> {
    let config = args.open_config(name)?;
    let mut queue = MessageQueue::new(event_loop);
    queue
        .open(&config)
        .with_context(|| format!("Failed to open '{}'", name))?;
    Ok(queue)
}

fn run_create(args: &Args, create: &CreateArgs, event_loop: &EventLoop) -> Result<()> {
    let config = create.apply(args.open_config(&create.name)?)?;
    let mut queue = MessageQueue::new(event_loop);
    queue
        .open(&config)
        .with_context(|| format!("Failed to create '{}'", create.name))?;
    let attrs = queue.attributes()?;
    info!(
        "Created {} ({} messages of up to {})",
        create.name,
        attrs.max_messages,
        format_bytes(attrs.message_size_limit)
    );
    queue.close()?;
    Ok(())
}

fn run_send(args: &Args, send: &SendArgs, event_loop: &EventLoop) -> Result<()> {
    let mut queue = open_existing(args, &send.name, event_loop)?;

    if send.fill {
        let mut rng = rand::thread_rng();
        let mut sent = 0usize;
        while queue.send(&[random_printable_byte(&mut rng)], send.priority)? {
            sent += 1;
        }
        info!(
            "Sent {} messages; {} is full ({} queued)",
            sent,
            send.name,
            queue.current_messages()?
        );
    } else {
        let message = send.message.as_deref().unwrap_or_default();
        if queue.send(message.as_bytes(), send.priority)? {
            info!("Sent {} bytes at priority {}", message.len(), send.priority);
        } else {
            warn!("{} is full; message not sent", send.name);
        }
    }

    queue.close()?;
    Ok(())
}

fn run_receive(args: &Args, receive: &ReceiveArgs, event_loop: &EventLoop) -> Result<()> {
    let mut queue = open_existing(args, &receive.name, event_loop)?;
    let mut buf = vec![0u8; queue.message_size_limit()?];
    let limit = receive.count.unwrap_or(usize::MAX);

    let mut received = 0usize;
    while received < limit {
        let Some((len, priority)) = queue.receive_with_priority(&mut buf)? else {
            break;
        };
        received += 1;
        println!("[{}] {}", priority, display_payload(&buf[..len]));
    }
    info!("Received {} messages, {} left", received, queue.current_messages()?);

    queue.close()?;
    Ok(())
}

/// Open the queue, wait for `"messages"`, drain on every notification.
fn run_watch(args: &Args, watch: &WatchArgs, event_loop: &mut EventLoop) -> Result<()> {
    let config = args.open_config(&watch.name)?;
    let queue = Rc::new(RefCell::new(MessageQueue::new(event_loop)));
    let once = watch.once || watch.unlink;
    let unlink = watch.unlink;
    let batches = Rc::new(Cell::new(0usize));
    let failure: Rc<RefCell<Option<anyhow::Error>>> = Rc::new(RefCell::new(None));

    let listener = {
        let queue = Rc::downgrade(&queue);
        let batches = Rc::clone(&batches);
        let failure = Rc::clone(&failure);
        move |event: QueueEvent| {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            match event {
                QueueEvent::Messages => {
                    if let Err(e) = drain(&mut queue.borrow_mut(), once, unlink) {
                        *failure.borrow_mut() = Some(e);
                    }
                    batches.set(batches.get() + 1);
                }
                QueueEvent::Drain => debug!("Queue has room for more messages"),
            }
        }
    };

    {
        let mut queue = queue.borrow_mut();
        queue.set_listener(listener)?;
        queue
            .open(&config)
            .with_context(|| format!("Failed to open '{}'", watch.name))?;
    }
    info!("Watching {} for up to {:?}", watch.name, watch.timeout);

    let finished = event_loop.run_until(watch.timeout, || {
        failure.borrow().is_some() || !queue.borrow().is_open() || (once && batches.get() > 0)
    })?;

    if let Some(e) = failure.borrow_mut().take() {
        return Err(e);
    }
    if !finished {
        info!("Timed out after {:?}", watch.timeout);
    }
    let mut queue = queue.borrow_mut();
    if queue.is_open() {
        queue.close()?;
    }
    Ok(())
}

fn drain(queue: &mut MessageQueue, close_after: bool, unlink: bool) -> Result<()> {
    let mut buf = vec![0u8; queue.message_size_limit()?];
    while let Some(len) = queue.receive(&mut buf)? {
        println!("Received message ({} bytes): {}", len, display_payload(&buf[..len]));
        println!("Messages left: {}", queue.current_messages()?);
    }
    if unlink {
        queue.unlink()?;
    }
    if close_after {
        queue.close()?;
    }
    Ok(())
}

#[derive(Serialize)]
struct InfoReport<'a> {
    name: &'a str,
    #[serde(flatten)]
    attributes: QueueAttributes,
    is_full: bool,
}

fn run_info(args: &Args, info_args: &InfoArgs, event_loop: &EventLoop) -> Result<()> {
    let mut queue = open_existing(args, &info_args.name, event_loop)?;
    let attributes = queue.attributes()?;
    let report = InfoReport {
        name: &info_args.name,
        attributes,
        is_full: attributes.is_full(),
    };

    if info_args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Queue:         {}", report.name);
        println!(
            "Messages:      {} / {}",
            attributes.current_messages, attributes.max_messages
        );
        println!(
            "Message size:  {}",
            format_bytes(attributes.message_size_limit)
        );
        println!("Full:          {}", report.is_full);
    }

    queue.close()?;
    Ok(())
}
