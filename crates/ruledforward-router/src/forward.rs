//! Deadline-bounded failover across a group's upstream pool.

use std::time::{Duration, Instant};

use hickory_proto::op::{Message, ResponseCode};
use tracing::debug;

use ruledforward_upstream::UpstreamError;

use crate::error::RouterError;
use crate::group::Group;
use crate::metrics;
use crate::router::rcode_reply;

/// Wall-clock budget for one forwarded request, across all retries.
pub(crate) const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Forward a request through the group's pool.
///
/// The pool is ordered by the group's policy once per request and walked
/// under a wall-clock deadline. A proxy reported down is skipped until the
/// whole pool looks down, at which point the first proxy is forced anyway.
/// Two retries stay on the same proxy: a cached connection that turned out
/// closed, and a truncated UDP reply when `prefer_udp` allows the TCP
/// upgrade. A reply whose identity does not match the request yields a
/// FormatError reply with no further retries.
pub async fn forward_group(group: &Group, req: &Message) -> Result<Message, RouterError> {
    if group.proxies.is_empty() {
        return Err(RouterError::NoHealthy);
    }

    let list = group.policy.list(&group.proxies);
    let deadline = Instant::now() + FORWARD_TIMEOUT;
    let mut i = 0usize;
    let mut fails = 0usize;
    let mut last_err: Option<UpstreamError> = None;

    while Instant::now() < deadline {
        if i >= list.len() {
            // One full pass completed; cycle again.
            i = 0;
            fails = 0;
        }
        let mut proxy = &list[i];
        i += 1;

        if proxy.down(group.max_fails) {
            fails += 1;
            if fails < group.proxies.len() {
                continue;
            }
            // Every proxy looks down; force the first one anyway.
            proxy = &list[0];
        }

        let mut opts = group.opts;
        let result = loop {
            match proxy.connect(req, opts).await {
                // The peer closed a cached connection; retry immediately
                // on the same proxy with a fresh one.
                Err(UpstreamError::CachedClosed) => continue,
                // Truncated over UDP: upgrade to TCP on the same proxy.
                Ok(reply) if reply.truncated() && opts.prefer_udp && !opts.force_tcp => {
                    opts.force_tcp = true;
                    continue;
                }
                other => break other,
            }
        };

        match result {
            Err(err) => {
                debug!(group = %group.name, addr = %proxy.addr(), error = %err, "upstream attempt failed");
                if group.max_fails != 0 {
                    proxy.healthcheck();
                }
                last_err = Some(err);
                if fails < group.proxies.len() {
                    continue;
                }
                break;
            }
            Ok(reply) => {
                if !reply_matches(req, &reply) {
                    debug!(
                        group = %group.name,
                        addr = %proxy.addr(),
                        id = reply.id(),
                        "upstream reply does not match request"
                    );
                    return Ok(rcode_reply(req, ResponseCode::FormErr));
                }
                return Ok(reply);
            }
        }
    }

    metrics::record_upstream_fail(&group.name);
    Err(match last_err {
        Some(err) => RouterError::Upstream(err),
        None => RouterError::NoHealthy,
    })
}

/// A reply is accepted only when its identity matches the request: same
/// message id and same question (name, type, class).
fn reply_matches(req: &Message, reply: &Message) -> bool {
    if reply.id() != req.id() {
        return false;
    }
    match (req.queries().first(), reply.queries().first()) {
        (Some(want), Some(got)) => {
            // Name equality is case-insensitive.
            want.name() == got.name()
                && want.query_type() == got.query_type()
                && want.query_class() == got.query_class()
        }
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::RecordType;

    fn query(id: u16, name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.add_query(Query::query(name.parse().unwrap(), RecordType::A));
        msg
    }

    fn reply_to(req: &Message) -> Message {
        let mut reply = Message::new();
        reply.set_id(req.id());
        reply.set_message_type(MessageType::Response);
        for q in req.queries() {
            reply.add_query(q.clone());
        }
        reply
    }

    #[test]
    fn matching_reply_accepted() {
        let req = query(7, "example.com.");
        assert!(reply_matches(&req, &reply_to(&req)));
    }

    #[test]
    fn case_differences_are_equal() {
        let req = query(7, "EXAMPLE.com.");
        let reply = reply_to(&query(7, "example.COM."));
        assert!(reply_matches(&req, &reply));
    }

    #[test]
    fn id_mismatch_rejected() {
        let req = query(7, "example.com.");
        let mut reply = reply_to(&req);
        reply.set_id(8);
        assert!(!reply_matches(&req, &reply));
    }

    #[test]
    fn name_mismatch_rejected() {
        let req = query(7, "example.com.");
        let reply = reply_to(&query(7, "other.com."));
        assert!(!reply_matches(&req, &reply));
    }

    #[test]
    fn type_mismatch_rejected() {
        let req = query(7, "example.com.");
        let mut reply = Message::new();
        reply.set_id(7);
        reply.set_message_type(MessageType::Response);
        reply.add_query(Query::query("example.com.".parse().unwrap(), RecordType::AAAA));
        assert!(!reply_matches(&req, &reply));
    }
}
