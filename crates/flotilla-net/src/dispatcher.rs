//! Bounded worker pool that decouples socket reads from listener code.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::info;

use flotilla_wire::Packet;

use crate::channel::TransportChannel;
use crate::error::NetError;

struct DispatchJob {
    channel: Arc<TransportChannel>,
    packet: Packet,
}

/// Hands received packets to listener code on a fixed pool of workers.
///
/// The queue is bounded, so a socket that produces packets faster than
/// listeners consume them is backpressured at the read loop instead of
/// buffering without limit. Packets from one channel may be processed
/// concurrently by different workers; ordering across packets is not
/// guaranteed.
pub struct PacketDispatcher {
    queue: mpsc::Sender<DispatchJob>,
}

impl PacketDispatcher {
    /// Spawns `workers` worker tasks sharing a queue of `capacity` jobs.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<DispatchJob>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        info!(workers, capacity, "🚚 Starting packet dispatcher");
        for _ in 0..workers {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    // Take the next job while holding the lock, process
                    // it without.
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    process(job).await;
                }
            });
        }

        Self { queue: tx }
    }

    /// Default sizing: one worker per core, at least two.
    pub fn with_default_size() -> Self {
        Self::new(num_cpus::get().max(2), 1024)
    }

    /// Enqueues a packet for listener processing, waiting when the queue
    /// is full.
    pub async fn dispatch(
        &self,
        channel: Arc<TransportChannel>,
        packet: Packet,
    ) -> Result<(), NetError> {
        let id = channel.id();
        self.queue
            .send(DispatchJob { channel, packet })
            .await
            .map_err(|_| NetError::ChannelClosed(id))
    }
}

async fn process(job: DispatchJob) {
    let DispatchJob { channel, packet } = job;
    // The channel handler can veto listener dispatch.
    if channel
        .handler()
        .handle_packet_receive(&channel, &packet)
        .await
    {
        channel.packet_registry().dispatch(&channel, &packet).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::detached_channel;
    use crate::registry::{PacketListener, PacketListenerRegistry};
    use async_trait::async_trait;
    use tokio::sync::mpsc::Sender;

    struct ForwardingListener(Sender<Packet>);

    #[async_trait]
    impl PacketListener for ForwardingListener {
        async fn handle(
            &self,
            _channel: &Arc<TransportChannel>,
            packet: &Packet,
        ) -> Result<(), NetError> {
            self.0.send(packet.clone()).await.ok();
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn packets_reach_listeners_through_workers() {
        let registry = Arc::new(PacketListenerRegistry::new());
        let (seen_tx, mut seen_rx) = mpsc::channel(8);
        registry.add_listener(7, Arc::new(ForwardingListener(seen_tx)));

        let (channel, _outbound) = detached_channel(1, registry);
        let dispatcher = PacketDispatcher::new(2, 8);

        for _ in 0..3 {
            dispatcher
                .dispatch(channel.clone(), Packet::empty(7))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            let packet = seen_rx.recv().await.unwrap();
            assert_eq!(packet.channel_id(), 7);
        }
    }
}
