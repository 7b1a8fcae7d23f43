//! Frame dispatch for the `Connected` state.
//!
//! | Frame        | Action                                   | Response   |
//! |--------------|------------------------------------------|------------|
//! | PUBLISH qos0 | batched publish                          | none       |
//! | PUBLISH qos1 | synchronous publish                      | PUBACK     |
//! | PUBLISH qos2 | synchronous publish, record in assurance | PUBREC     |
//! | PUBREL       | drop assurance entry                     | PUBCOMP    |
//! | SUBSCRIBE    | open bus subscriptions                   | SUBACK     |
//! | UNSUBSCRIBE  | close subscriptions matching each regex  | UNSUBACK   |
//! | PINGREQ      |                                          | PINGRESP   |
//! | DISCONNECT   | stop reading                             | none       |
//!
//! A failed bus publish produces no acknowledgment and is not retried.

use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Connection, Flow};
use crate::{
    bus::{ConsumerSession, TopicPattern},
    codec::{Frame, Publish, QoS, SUBACK_FAILURE, SubAck, Subscribe, Unsubscribe},
    metrics,
};

/// Separator between filters packed into one UNSUBSCRIBE string.
const FILTER_SEPARATOR: char = ',';

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(super) async fn dispatch(&mut self, frame: Frame) -> Flow {
        match frame {
            Frame::Publish(publish) => self.on_publish(publish).await,
            Frame::PubRel(id) => {
                if !self.assurance.acknowledge(id) {
                    debug!("PUBREL for unknown message: id={}, message_id={id}", self.id);
                }
                self.respond(Frame::PubComp(id)).await;
            }
            Frame::Subscribe(subscribe) => self.on_subscribe(subscribe).await,
            Frame::Unsubscribe(unsubscribe) => self.on_unsubscribe(unsubscribe).await,
            Frame::PingReq => self.respond(Frame::PingResp).await,
            Frame::Disconnect => {
                debug!("client sent DISCONNECT: id={}", self.id);
                return Flow::Disconnect;
            }
            Frame::PubAck(_) | Frame::PubRec(_) | Frame::PubComp(_) => {}
            other => {
                metrics::inc_errors();
                warn!(
                    "unexpected frame ignored: id={}, packet={}",
                    self.id,
                    other.packet_type()
                );
            }
        }
        Flow::Continue
    }

    async fn on_publish(&mut self, publish: Publish) {
        let Publish {
            qos,
            topic,
            message_id,
            payload,
            ..
        } = publish;
        let bridge = Arc::clone(&self.ctx.bridge);
        match (qos, message_id) {
            (QoS::AtMostOnce, _) => bridge.publish_async(&topic, payload),
            (QoS::AtLeastOnce, Some(id)) => {
                if bridge.publish_sync(&topic, payload).await.is_ok() {
                    self.respond(Frame::PubAck(id)).await;
                }
            }
            (QoS::ExactlyOnce, Some(id)) => {
                if bridge.publish_sync(&topic, payload).await.is_ok() {
                    let pubrec = self.assurance.record(id);
                    self.respond(pubrec).await;
                }
            }
            (_, None) => warn!("PUBLISH without message id ignored: id={}, qos={qos:?}", self.id),
        }
    }

    async fn on_subscribe(&mut self, subscribe: Subscribe) {
        let Some(session) = self.consumer_session().await else {
            return;
        };
        let bridge = Arc::clone(&self.ctx.bridge);
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for request in subscribe.filters {
            match bridge.subscribe(session.as_ref(), &request.filter).await {
                Ok(opened) => {
                    debug!(
                        "subscribed: id={}, filter={}, topics={}",
                        self.id,
                        request.filter,
                        opened.len()
                    );
                    for subscription in opened {
                        self.subscriptions.insert(subscription, request.qos, &self.writer);
                    }
                    return_codes.push(request.qos.as_u8());
                }
                Err(e) => {
                    metrics::inc_errors();
                    warn!("subscribe failed: id={}, filter={}, error={e}", self.id, request.filter);
                    return_codes.push(SUBACK_FAILURE);
                }
            }
        }
        if return_codes.iter().all(|code| *code == SUBACK_FAILURE) {
            return;
        }
        self.respond(Frame::SubAck(SubAck {
            message_id: subscribe.message_id,
            return_codes,
        }))
        .await;
    }

    async fn on_unsubscribe(&mut self, unsubscribe: Unsubscribe) {
        let mut closed = 0;
        for filter in unsubscribe
            .filters
            .iter()
            .flat_map(|packed| packed.split(FILTER_SEPARATOR))
            .filter(|filter| !filter.is_empty())
        {
            match TopicPattern::new(filter) {
                Ok(pattern) => closed += self.subscriptions.remove_matching(&pattern),
                Err(e) => warn!("unsubscribe filter ignored: id={}, error={e}", self.id),
            }
        }
        debug!("unsubscribed: id={}, closed={closed}", self.id);
        self.respond(Frame::UnsubAck(unsubscribe.message_id)).await;
    }

    /// Session borrowed for this connection's subscriptions, acquired on
    /// first use.
    async fn consumer_session(&mut self) -> Option<Arc<dyn ConsumerSession>> {
        if self.lease.is_none() {
            match self.ctx.bridge.acquire_consumer().await {
                Ok(lease) => self.lease = Some(lease),
                Err(e) => {
                    metrics::inc_errors();
                    warn!("consumer session unavailable: id={}, error={e}", self.id);
                    return None;
                }
            }
        }
        self.lease.as_ref().map(|lease| Arc::clone(lease.session()))
    }
}
