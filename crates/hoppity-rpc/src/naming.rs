//! Queue names and routing keys shared by every RPC participant

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `rpc_<service>_<instance>_reply`, non-alphanumerics replaced by `_`
pub fn reply_queue_name(service_name: &str, instance_id: &str) -> String {
    format!(
        "rpc_{}_{}_reply",
        sanitize(service_name),
        sanitize(instance_id)
    )
}

/// `rpc_<service>_<instance>_inbound`, non-alphanumerics replaced by `_`
pub fn inbound_queue_name(service_name: &str, instance_id: &str) -> String {
    format!(
        "rpc_{}_{}_inbound",
        sanitize(service_name),
        sanitize(instance_id)
    )
}

/// Routing key of a request for `rpc_name`
pub fn rpc_routing_key(rpc_name: &str) -> String {
    format!("rpc.{rpc_name}.request")
}

/// Binding key matching every request addressed to `service_name`
pub fn service_binding_pattern(service_name: &str) -> String {
    format!("rpc.{service_name}.#.request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_replace_unsafe_characters() {
        assert_eq!(reply_queue_name("billing-api", "pod.7"), "rpc_billing_api_pod_7_reply");
        assert_eq!(inbound_queue_name("billing", "1"), "rpc_billing_1_inbound");
    }

    #[test]
    fn routing_key_falls_under_service_pattern() {
        assert_eq!(rpc_routing_key("billing.charge"), "rpc.billing.charge.request");
        assert_eq!(service_binding_pattern("billing"), "rpc.billing.#.request");
        assert!(hoppity::memory::topic_matches(
            &service_binding_pattern("billing"),
            &rpc_routing_key("billing.charge")
        ));
    }
}
