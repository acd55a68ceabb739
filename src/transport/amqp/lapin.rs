//! AMQP transport implementation using `lapin`.
//!
//! ## Concurrency model
//!
//! A single background **actor task** owns the AMQP connection and channel
//! and performs every publish, queue declaration and consumer start. The
//! `Transport` methods only exchange commands with it, so concurrent calls
//! publishing through one transport are serialized without any caller
//! touching the channel directly.
//!
//! ## Message mapping
//!
//! Envelope metadata travels in AMQP basic properties, not in the body:
//!
//! | Envelope field   | AMQP property     |
//! |------------------|-------------------|
//! | `correlation_id` | `correlation_id`  |
//! | `reply_to`       | `reply_to`        |
//! | `expiration`     | `expiration` (ms) |
//! | `content_type`   | `content_type`    |
//!
//! The body is the envelope payload, unchanged. Publishing uses the default
//! exchange with the destination queue name as routing key, so any AMQP
//! peer that speaks the same properties can interoperate.
//!
//! ## Queue semantics
//!
//! Queues are declared non-durable and auto-delete: RPC traffic is
//! transient and a reply queue should vanish with its client.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

const INBOX_CAPACITY: usize = 64;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        queue: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// AMQP transport implementation using lapin.
pub struct AmqpTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Wrap an open connection and spawn the actor that owns it.
    fn create(config: &TransportConfig, connection: Connection, channel: Channel) -> TransportPtr {
        // ---
        let base = TransportBase::from(config);

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

        let actor = Actor {
            transport_id: base.transport_id.clone(),
            connection,
            channel,
            cmd_rx,
            subscribers: Arc::clone(&subscribers),
            consumer_handles: HashMap::new(),
        };

        let handle = tokio::spawn(actor.run());

        Arc::new(Self {
            base,
            cmd_tx,
            subscribers,
            actor: Mutex::new(Some(handle)),
        })
    }

    async fn send_cmd(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Cmd) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|e| {
            let msg = format!("amqp: actor command channel closed: {e}");
            RpcError::Transport(msg)
        })?;

        rx.await.map_err(|e| {
            let msg = format!("amqp: actor dropped the request: {e}");
            RpcError::Transport(msg)
        })?
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    transport_id: String,
    connection: Connection,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    consumer_handles: HashMap<String, JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        log_info!("[{}] AMQP actor started", self.transport_id);

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Cmd::Publish { env, resp } => {
                    let _ = resp.send(self.do_publish(env).await);
                }
                Cmd::Subscribe { queue, resp } => {
                    let _ = resp.send(self.do_subscribe(queue).await);
                }
                Cmd::Close { resp } => {
                    let _ = resp.send(Ok(()));
                    break;
                }
            }
        }

        log_info!("[{}] AMQP actor shutting down", self.transport_id);

        for (_, handle) in self.consumer_handles.drain() {
            handle.abort();
        }

        // Dropping the senders ends every subscriber inbox.
        self.subscribers.write().await.clear();

        if let Err(e) = self.channel.close(200, "Normal shutdown".into()).await {
            log_warn!("[{}] channel close failed: {e}", self.transport_id);
        }
        if let Err(e) = self.connection.close(200, "Normal shutdown".into()).await {
            log_warn!("[{}] connection close failed: {e}", self.transport_id);
        }

        log_info!("[{}] AMQP actor stopped", self.transport_id);
    }

    async fn do_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let queue = env.address.as_str();
        let properties = to_properties(&env);

        self.channel
            .basic_publish(
                "".into(),    // default exchange
                queue.into(), // routing key = queue name
                BasicPublishOptions::default(),
                &env.payload,
                properties,
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish failed: {e}")))?;

        log_debug!("[{}] Published to queue: {queue}", self.transport_id);
        Ok(())
    }

    async fn do_subscribe(&mut self, queue: String) -> Result<()> {
        // ---
        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: true,
            nowait: false,
        };

        self.channel
            .queue_declare(queue.clone().into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        log_info!("[{}] Declared queue: {queue}", self.transport_id);

        if self.consumer_handles.contains_key(&queue) {
            log_debug!("[{}] Already consuming queue: {queue}", self.transport_id);
            return Ok(());
        }

        let consumer = self
            .channel
            .basic_consume(
                queue.clone().into(),
                format!("{}-{queue}", self.transport_id).into(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        log_info!("[{}] Started consuming queue: {queue}", self.transport_id);

        let queue_clone = queue.clone();
        let transport_id = self.transport_id.clone();
        let subscribers = Arc::clone(&self.subscribers);

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                let delivery = match delivery_result {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        log_error!("[{transport_id}] Consumer error on {queue_clone}: {e}");
                        break;
                    }
                };

                log_debug!("[{transport_id}] Received message on queue: {queue_clone}");

                let envelope = from_delivery(&queue_clone, &delivery.properties, delivery.data.clone());

                fan_out(&subscribers, &transport_id, &queue_clone, envelope).await;

                // Ack only once every subscriber inbox has the envelope.
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    log_error!("[{transport_id}] Failed to ack message: {e}");
                }
            }

            log_info!("[{transport_id}] Consumer task ended for queue: {queue_clone}");
        });

        self.consumer_handles.insert(queue, handle);

        Ok(())
    }
}

/// Hand `envelope` to every subscriber of `queue`; returns the number of
/// inboxes that accepted it.
async fn fan_out(
    subscribers: &SubscriberMap,
    transport_id: &str,
    queue: &str,
    envelope: Envelope,
) -> usize {
    // ---
    let subs = subscribers.read().await;
    let Some(senders) = subs.get(queue) else {
        return 0;
    };

    let mut delivered = 0;
    for sender in senders {
        if sender.send(envelope.clone()).await.is_ok() {
            delivered += 1;
        } else {
            log_debug!("[{transport_id}] subscriber inbox closed on {queue}");
        }
    }
    delivered
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn short(value: &str) -> ShortString {
    ShortString::from(value.to_string())
}

/// AMQP `expiration` is a decimal string of milliseconds.
fn expiration_millis(ttl: Duration) -> String {
    ttl.as_millis().to_string()
}

fn to_properties(env: &Envelope) -> BasicProperties {
    // ---
    let mut props = BasicProperties::default();

    if let Some(id) = &env.correlation_id {
        props = props.with_correlation_id(short(id));
    }
    if let Some(reply_to) = &env.reply_to {
        props = props.with_reply_to(short(reply_to.as_str()));
    }
    if let Some(ttl) = env.expiration {
        props = props.with_expiration(short(&expiration_millis(ttl)));
    }
    if let Some(content_type) = &env.content_type {
        props = props.with_content_type(short(content_type));
    }

    props
}

fn from_delivery(queue: &str, props: &BasicProperties, data: Vec<u8>) -> Envelope {
    // ---
    Envelope {
        address: Address::from(queue),
        payload: data.into(),
        correlation_id: props.correlation_id().as_ref().map(|s| Arc::from(s.as_str())),
        reply_to: props.reply_to().as_ref().map(|s| Address::from(s.as_str())),
        expiration: props
            .expiration()
            .as_ref()
            .and_then(|s| s.as_str().parse::<u64>().ok())
            .map(Duration::from_millis),
        content_type: props.content_type().as_ref().map(|s| Arc::from(s.as_str())),
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.send_cmd(|resp| Cmd::Publish { env, resp }).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let queue = sub.0.as_ref().to_string();

        // Register the local inbox first so nothing consumed after the
        // declare is lost.
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        {
            let mut map = self.subscribers.write().await;
            map.entry(queue.clone()).or_default().push(tx);
        }

        self.send_cmd(|resp| Cmd::Subscribe { queue, resp }).await?;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let actor = lock_ignore_poison(&self.actor).take();
        let Some(actor) = actor else {
            return Ok(());
        };

        if let Err(e) = self.send_cmd(|resp| Cmd::Close { resp }).await {
            log_debug!("[{}] actor already gone: {e}", self.transport_id());
        }

        actor
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: actor task failed: {e}")))
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// # Errors
///
/// Returns `RpcError::Transport` if the connection or channel cannot be
/// established.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let (connection, channel) = create_amqp_connection(&config).await?;
    Ok(AmqpTransport::create(&config, connection, channel))
}

async fn create_amqp_connection(config: &TransportConfig) -> Result<(Connection, Channel)> {
    // ---
    let uri = config.uri.as_str();

    log_info!("[{}] Connecting to AMQP broker: {uri}", config.node_id);

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!("{msg}");
            RpcError::Transport(msg)
        })?;

    let channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        log_error!("{msg}");
        RpcError::Transport(msg)
    })?;

    log_info!("[{}] Connected to AMQP broker", config.node_id);

    Ok((connection, channel))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn request_metadata_round_trips_through_properties() {
        // ---
        let env = Envelope::request(
            Address::from("rpc-calc"),
            bytes::Bytes::from_static(b"body"),
            Arc::from("corr-1"),
            Address::from("rpc-reply-client"),
            Duration::from_millis(1500),
        );

        let props = to_properties(&env);
        assert_eq!(props.expiration().as_ref().map(|s| s.as_str()), Some("1500"));

        let back = from_delivery("rpc-calc", &props, b"body".to_vec());
        assert_eq!(back.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(back.reply_to, Some(Address::from("rpc-reply-client")));
        assert_eq!(back.expiration, Some(Duration::from_millis(1500)));
        assert_eq!(back.payload, env.payload);
    }

    #[tokio::test]
    async fn fan_out_fills_every_open_inbox_before_returning() {
        // ---
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let (tx_a, mut rx_a) = mpsc::channel(1);
        let (tx_b, mut rx_b) = mpsc::channel(1);
        let (tx_gone, rx_gone) = mpsc::channel(1);
        drop(rx_gone);

        subscribers
            .write()
            .await
            .insert("rpc-reply-client".into(), vec![tx_a, tx_b, tx_gone]);

        let env = Envelope::response(
            Address::from("rpc-reply-client"),
            bytes::Bytes::from_static(b"answer"),
            Arc::from("corr-2"),
        );

        let delivered = fan_out(&subscribers, "test", "rpc-reply-client", env).await;
        assert_eq!(delivered, 2);

        // Both inboxes already hold the envelope when fan_out returns.
        assert_eq!(rx_a.try_recv().unwrap().correlation_id.as_deref(), Some("corr-2"));
        assert_eq!(rx_b.try_recv().unwrap().payload, bytes::Bytes::from_static(b"answer"));

        let stray = Envelope::response(
            Address::from("unknown-queue"),
            bytes::Bytes::new(),
            Arc::from("corr-3"),
        );
        assert_eq!(fan_out(&subscribers, "test", "unknown-queue", stray).await, 0);
    }
}
