//! The dispatcher: zone gate, ordered group scan, default fallback and
//! pass-through.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ruledforward_rules::{fqdn, GeositeCatalog};

use crate::config::{validate_config, ConfigError, GroupAction, RouterConfig, DEFAULT_GROUP};
use crate::error::RouterError;
use crate::forward::forward_group;
use crate::group::{Group, UpdateMask};
use crate::refresh::spawn_refresh;
use crate::{metrics, DnsHandler};

/// TTL of the synthesised SOA on empty replies.
const EMPTY_TTL: u32 = 60;

/// The rule-based DNS request router.
///
/// For each query inside its source zone the router scans its groups in
/// configured order, skipping the one named `default`; the first group
/// whose matcher accepts the qname applies its action. When no group
/// matches, the `default` group (if any) applies; otherwise the query
/// passes through to the next handler.
pub struct RuledForward {
    from: Name,
    groups: Vec<Arc<Group>>,
    default_group: Option<Arc<Group>>,
    catalog: Option<Arc<GeositeCatalog>>,
    next: Option<Arc<dyn DnsHandler>>,
    shutdown: CancellationToken,
}

impl RuledForward {
    /// Build the router from configuration: load the geosite catalog,
    /// construct the groups and perform their initial full update.
    /// Configuration and catalog problems are fatal here.
    pub async fn new(
        config: RouterConfig,
        next: Option<Arc<dyn DnsHandler>>,
    ) -> Result<Self, RouterError> {
        validate_config(&config)?;
        let from: Name = config
            .from
            .parse()
            .map_err(|_| ConfigError::Validation(format!("unable to normalize zone '{}'", config.from)))?;

        let catalog = match &config.dlcfile {
            Some(path) => Some(Arc::new(
                GeositeCatalog::load(path).map_err(RouterError::Catalog)?,
            )),
            None => None,
        };

        let mut groups = Vec::with_capacity(config.groups.len());
        for group_config in &config.groups {
            groups.push(Arc::new(Group::from_config(group_config)?));
        }
        for group in &groups {
            group.update(catalog.as_deref(), UpdateMask::ALL).await?;
        }

        let default_group = groups.iter().find(|g| g.name == DEFAULT_GROUP).cloned();

        Ok(RuledForward {
            from,
            groups,
            default_group,
            catalog,
            next,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the refresh loop of every group that has both a schedule and
    /// at least one remote list.
    pub fn start(&self) {
        for group in &self.groups {
            if group.refresh.is_some() && !group.adguard_urls.is_empty() {
                spawn_refresh(
                    Arc::clone(group),
                    self.catalog.clone(),
                    self.shutdown.clone(),
                );
            }
        }
    }

    /// Stop all refresh loops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Dispatch one query.
    pub async fn serve(&self, req: &Message) -> Result<Message, RouterError> {
        let Some(query) = req.queries().first() else {
            return self.next_or_failure(req).await;
        };

        if !self.from.is_root() && !self.from.zone_of(query.name()) {
            return self.next_or_failure(req).await;
        }

        let qname = fqdn(&query.name().to_string());
        for group in &self.groups {
            if group.name == DEFAULT_GROUP {
                continue;
            }
            let Some(matcher) = group.matcher() else {
                continue;
            };
            if !matcher.matches(&qname) {
                continue;
            }
            debug!(group = %group.name, qname = %qname, "group matched");
            return self.apply(group, req, query.name()).await;
        }

        if let Some(group) = &self.default_group {
            debug!(group = %group.name, qname = %qname, "default group applied");
            return self.apply(group, req, query.name()).await;
        }

        metrics::record_no_match();
        self.next_or_failure(req).await
    }

    async fn apply(
        &self,
        group: &Arc<Group>,
        req: &Message,
        qname: &Name,
    ) -> Result<Message, RouterError> {
        match group.action {
            GroupAction::Empty => {
                metrics::record_request(&group.name, "empty");
                Ok(empty_reply(req, qname))
            }
            GroupAction::Forward => {
                metrics::record_request(&group.name, "forward");
                match forward_group(group, req).await {
                    Ok(reply) => Ok(reply),
                    Err(err) => {
                        warn!(group = %group.name, error = %err, "forward failed");
                        Ok(rcode_reply(req, ResponseCode::ServFail))
                    }
                }
            }
        }
    }

    async fn next_or_failure(&self, req: &Message) -> Result<Message, RouterError> {
        match &self.next {
            Some(next) => next.handle(req).await,
            None => Err(RouterError::NoNextHandler),
        }
    }

    /// Groups in configured order (read-only view).
    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }
}

impl Drop for RuledForward {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl DnsHandler for RuledForward {
    async fn handle(&self, req: &Message) -> Result<Message, RouterError> {
        self.serve(req).await
    }
}

/// A reply skeleton echoing the request's id, opcode, recursion bit and
/// question section.
fn reply_frame(req: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(req.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(req.op_code());
    reply.set_recursion_desired(req.recursion_desired());
    for query in req.queries() {
        reply.add_query(query.clone());
    }
    reply
}

/// A reply with only a response code set.
pub(crate) fn rcode_reply(req: &Message, code: ResponseCode) -> Message {
    let mut reply = reply_frame(req);
    reply.set_response_code(code);
    reply
}

/// NODATA: zero answers and a single synthetic SOA in the authority
/// section, owner = qname, TTL 60, every numeric field zero except the
/// minimum TTL.
fn empty_reply(req: &Message, qname: &Name) -> Message {
    let mut reply = reply_frame(req);
    reply.set_response_code(ResponseCode::NoError);
    let soa = SOA::new(Name::root(), Name::root(), 0, 0, 0, 0, EMPTY_TTL);
    let mut record = Record::from_rdata(qname.to_lowercase(), EMPTY_TTL, RData::SOA(soa));
    record.set_dns_class(DNSClass::IN);
    reply.add_name_server(record);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::RecordType;

    fn query(name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(99);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(name.parse().unwrap(), RecordType::A));
        msg
    }

    #[test]
    fn empty_reply_shape() {
        let req = query("Blocked.Example.COM.");
        let qname: Name = "Blocked.Example.COM.".parse().unwrap();
        let reply = empty_reply(&req, &qname);

        assert_eq!(reply.id(), 99);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(reply.answers().is_empty());
        assert_eq!(reply.name_servers().len(), 1);

        let record = &reply.name_servers()[0];
        assert_eq!(record.record_type(), RecordType::SOA);
        assert_eq!(record.ttl(), EMPTY_TTL);
        assert_eq!(record.name().to_string(), "blocked.example.com.");
        let RData::SOA(soa) = record.data() else {
            panic!("expected SOA rdata");
        };
        assert!(soa.mname().is_root());
        assert!(soa.rname().is_root());
        assert_eq!(soa.serial(), 0);
        assert_eq!(soa.refresh(), 0);
        assert_eq!(soa.retry(), 0);
        assert_eq!(soa.expire(), 0);
        assert_eq!(soa.minimum(), EMPTY_TTL);
    }

    #[test]
    fn rcode_reply_echoes_question() {
        let req = query("example.com.");
        let reply = rcode_reply(&req, ResponseCode::ServFail);
        assert_eq!(reply.id(), 99);
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(reply.queries().len(), 1);
    }
}
