use std::{
    env,
    process,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{error, info, LevelFilter};
use membership_messenger::{
    config::MessengerConfig,
    member::Member,
    message::{Message, MessageKind, Payload},
    messenger::Messenger,
    view::View,
};

const DEFAULT_PEERS: usize = 3;
const DEFAULT_COUNT: usize = 1000;
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Received {
    count: AtomicUsize,
    total_latency_millis: AtomicI64,
}

#[tokio::main]
async fn main() {
    let mut clog = colog::default_builder();

    #[cfg(debug_assertions)]
    clog.filter_level(LevelFilter::Debug);

    #[cfg(not(debug_assertions))]
    clog.filter_level(LevelFilter::Warn);

    clog.init();

    let args: Vec<String> = env::args().collect();

    // 1st command line arg is the name of the environment
    let environment = args.get(1).map_or("dev", |s| s.as_str());

    // 2nd command line arg is the number of messengers in the cluster
    let peers = parse_arg(&args, 2, DEFAULT_PEERS);

    // 3rd command line arg is the number of heartbeats each messenger sends to each other one
    let count = parse_arg(&args, 3, DEFAULT_COUNT);

    if peers < 2 {
        println!("At least 2 peers are needed to exchange heartbeats");
        process::exit(1);
    }

    let config = match MessengerConfig::load(environment) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration for {environment}: {err}");
            process::exit(1);
        }
    };

    let stop_signal = Arc::new(AtomicBool::new(false));
    let ctrlc_stop_signal = stop_signal.clone();
    if let Err(err) = ctrlc::set_handler(move || ctrlc_stop_signal.store(true, Ordering::Relaxed)) {
        error!("Unable to handle Ctrl-C: {err}");
    }

    let received = Arc::new(Received::default());
    let messengers = match start_cluster(&config, peers, &received) {
        Ok(messengers) => messengers,
        Err(err) => {
            error!("Failed to start cluster: {err}");
            process::exit(1);
        }
    };

    let members: Vec<Member> = messengers.iter().filter_map(|m| m.get_member_id().ok()).collect();
    let view = View::new(1, members.first().cloned(), members.clone());
    for messenger in messengers.iter() {
        if let Err(err) = messenger.install_view(view.clone()) {
            error!("Failed to install view: {err}");
        }
    }

    let expected = peers * (peers - 1) * count;
    info!("Sending {expected} heartbeats between {peers} messengers");
    let start = Instant::now();

    let mut threads: Vec<thread::JoinHandle<()>> = Vec::with_capacity(peers);
    for (index, messenger) in messengers.iter().enumerate() {
        let messenger = messenger.clone();
        let others: Vec<Member> = members.iter().enumerate().filter(|(i, _)| *i != index).map(|(_, m)| m.clone()).collect();
        let stop_signal = stop_signal.clone();
        let worker = thread::Builder::new().name(format!("pinger-{}", index + 1));
        let spawned = worker.spawn(move || {
            for request_id in 0..count as u32 {
                if stop_signal.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(err) = messenger.send(Message::heartbeat(others.clone(), request_id)) {
                    error!("Pinger: Failed to send heartbeat {request_id}: {err}");
                    break;
                }
            }
        });
        match spawned {
            Ok(thread) => threads.push(thread),
            Err(err) => error!("Failed to start pinger thread: {err}"),
        }
    }

    for thread in threads {
        if thread.join().is_err() {
            error!("Pinger thread panicked");
        }
    }

    while received.count.load(Ordering::Relaxed) < expected
        && !stop_signal.load(Ordering::Relaxed)
        && start.elapsed() < COMPLETION_TIMEOUT
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let elapsed = start.elapsed();
    let delivered = received.count.load(Ordering::Relaxed);
    println!("Elapsed: {:.2?} delivering {delivered} of {expected} heartbeats between {peers} messengers", elapsed);
    println!(
        "Average throughput {} messages/sec",
        thousands(&((delivered as f64) / elapsed.as_secs_f64()).floor().to_string())
    );
    if delivered > 0 {
        println!(
            "Average latency {} ms",
            received.total_latency_millis.load(Ordering::Relaxed) as f64 / delivered as f64
        );
    }

    for messenger in messengers.iter() {
        if let Ok(member) = messenger.get_member_id() {
            println!("{member}: {:?}", messenger.stats());
        }
        if let Err(err) = messenger.stop() {
            error!("Failed to stop messenger: {err}");
        }
    }
}

fn start_cluster(
    config: &MessengerConfig,
    peers: usize,
    received: &Arc<Received>,
) -> membership_messenger::error::MessengerResult<Vec<Arc<Messenger>>> {
    let mut messengers = Vec::with_capacity(peers);

    for index in 0..peers {
        let messenger = Arc::new(Messenger::new());
        messenger.init(MessengerConfig {
            bind_port: 0,
            name: format!("ping-{}", index + 1),
            ..config.clone()
        })?;

        let received = received.clone();
        messenger.add_handler(
            MessageKind::Heartbeat,
            Arc::new(move |message: Message| {
                if let Payload::Heartbeat { timestamp, .. } = message.payload {
                    let latency = Utc::now().timestamp_millis() - timestamp;
                    received.total_latency_millis.fetch_add(latency, Ordering::Relaxed);
                }
                received.count.fetch_add(1, Ordering::Relaxed);
            }),
        );

        messenger.start()?;
        messengers.push(messenger);
    }

    Ok(messengers)
}

fn parse_arg(args: &[String], index: usize, default: usize) -> usize {
    match args.get(index) {
        Some(s) => s.parse().unwrap_or_else(|_| {
            println!("'{s}' is not a number, using {default}");
            default
        }),
        None => default,
    }
}

fn thousands(s: &str) -> String {
    let digits: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.iter().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            result.push(',');
        }
        result.push(*digit);
    }
    result
}
