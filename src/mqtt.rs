use crate::config::Config;
use anyhow::{Context, Result};
use classic_mqtt_lib::publisher::{Publisher, Topics, Transport};
use classic_mqtt_lib::scheduler::{RateSettings, SchedulerState};
use classic_mqtt_lib::supervisor::{
    lock_state, CommandHandler, SharedState, ShutdownReason, Supervisor,
};
use classic_mqtt_lib::tokio_sync_client::{DataSource, TcpConnector};
use log::*;
use paho_mqtt as mqtt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const LWT_ONLINE: &str = "Online";
const LWT_OFFLINE: &str = "Offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker side of the publisher.
pub struct MqttTransport {
    client: mqtt::AsyncClient,
    qos: i32,
}

impl Transport for MqttTransport {
    type Error = mqtt::Error;

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn publish(&self, topic: &str, payload: &str, retained: bool) -> Result<(), mqtt::Error> {
        let msg = if retained {
            mqtt::Message::new_retained(topic, payload, self.qos)
        } else {
            mqtt::Message::new(topic, payload, self.qos)
        };
        self.client.publish(msg).wait()
    }
}

fn client_id(user: &str) -> String {
    format!("{user}_mqttclient_{}", 100 + rand::random::<u16>() % 900)
}

/// Subscribes to the command topic and announces the bridge.
fn go_online(client: &mqtt::AsyncClient, topics: &Topics, qos: i32) -> Result<()> {
    client
        .subscribe(&topics.command, qos)
        .wait()
        .with_context(|| format!("Cannot subscribe to {}", topics.command))?;
    client
        .publish(mqtt::Message::new(&topics.lwt, LWT_ONLINE, qos))
        .wait()
        .with_context(|| "Cannot publish mqtt message")?;
    Ok(())
}

fn go_offline(client: &mqtt::AsyncClient, topics: &Topics, qos: i32) -> Result<()> {
    client
        .publish(mqtt::Message::new_retained(&topics.lwt, LWT_OFFLINE, qos))
        .wait()
        .with_context(|| "Cannot publish mqtt message")?;
    Ok(())
}

/// Feeds inbound messages to the command handler and reconnects when the broker goes away.
fn spawn_command_listener(
    client: mqtt::AsyncClient,
    receiver: mqtt::Receiver<Option<mqtt::Message>>,
    handler: CommandHandler,
    state: SharedState,
    topics: Topics,
    qos: i32,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("mqtt-commands".to_string())
        .spawn(move || {
            for msg in receiver.iter() {
                if let Some(msg) = msg {
                    debug!("Command on {}: {}", msg.topic(), msg.payload_str());
                    handler.handle(msg.payload());
                    continue;
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!("Lost connection to the broker, reconnecting");
                while let Err(err) = client.reconnect().wait() {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    warn!("Error reconnecting: {err}");
                    thread::sleep(RECONNECT_DELAY);
                }
                info!("Reconnected to the broker");
                if let Err(err) = go_online(&client, &topics, qos) {
                    error!("{err:#}");
                }
                lock_state(&state).invalidate_info();
            }
        })
        .with_context(|| "Cannot spawn command listener")
}

/// Runs the bridge until stopped or an error ceiling is reached.
pub fn run_daemon(config: &Config, settings: RateSettings) -> Result<ShutdownReason> {
    let qos = config.mqtt.qos();
    let topics = Topics::new(&config.mqtt.root, &config.classic.name);

    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(config.mqtt.url())
        .client_id(client_id(&config.mqtt.user))
        .finalize();
    let client =
        mqtt::AsyncClient::new(create_opts).with_context(|| "Error creating mqtt client")?;

    // Get message stream before connecting.
    let receiver = client.start_consuming();

    let conn_opts = mqtt::ConnectOptionsBuilder::new()
        .keep_alive_interval(Duration::from_secs(20))
        .clean_session(true)
        .user_name(&config.mqtt.user)
        .password(&config.mqtt.password)
        .will_message(mqtt::Message::new_retained(&topics.lwt, LWT_OFFLINE, qos))
        .finalize();
    client
        .connect(conn_opts)
        .wait()
        .with_context(|| format!("Mqtt client unable to connect to {}", config.mqtt.url()))?;
    go_online(&client, &topics, qos)?;

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
        trace!("Received Ctrl-C")
    })
    .with_context(|| "Error setting Ctrl-C handler")?;

    let state: SharedState = Arc::new(Mutex::new(SchedulerState::new(settings)));
    let listener = spawn_command_listener(
        client.clone(),
        receiver,
        CommandHandler::new(state.clone(), stop.clone()),
        state.clone(),
        topics.clone(),
        qos,
        stop.clone(),
    )?;

    let source = DataSource::new(
        TcpConnector::new(
            config.classic.host.clone(),
            config.classic.port,
            config.classic.unit_id,
            config.classic.timeout,
        ),
        config.classic.host.clone(),
    );
    let publisher = Publisher::new(
        MqttTransport {
            client: client.clone(),
            qos,
        },
        topics.clone(),
    );

    info!("Starting, publishing to {}", config.mqtt.url());
    let reason = Supervisor::new(state, source, publisher, stop.clone()).run();
    info!("Stopping ({reason:?})");
    stop.store(true, Ordering::SeqCst);

    if let Err(err) = go_offline(&client, &topics, qos) {
        warn!("{err:#}");
    }
    client.stop_consuming();
    client
        .disconnect(None)
        .wait()
        .with_context(|| "Error disconnect mqtt client")?;
    if listener.join().is_err() {
        warn!("Command listener panicked");
    }
    Ok(reason)
}
