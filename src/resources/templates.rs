//! Prometheus configuration templates

use minijinja::{Environment, ErrorKind, context};

use crate::crd::LotusCheck;

const PROMETHEUS_CONFIG: &str = "prometheus-config.yaml";
const PROMETHEUS_RULE: &str = "prometheus-rule.yaml";

const PROMETHEUS_CONFIG_TEMPLATE: &str = r#"global:
  scrape_interval: 5s
  scrape_timeout: 5s
  evaluation_interval: 5s
  external_labels:
    monitor: prometheus
    replica: {{ name }}
scrape_configs:
- job_name: lotus-runner
  metrics_path: /metrics
  scheme: http
  kubernetes_sd_configs:
  - role: endpoints
    namespaces:
      names:
      - {{ namespace }}
  relabel_configs:
  - source_labels: [__meta_kubernetes_service_name]
    separator: ;
    regex: {{ service_name }}
    replacement: $1
    action: keep
  - source_labels: [__meta_kubernetes_namespace]
    separator: ;
    regex: (.*)
    target_label: namespace
    replacement: $1
    action: replace
  - source_labels: [__meta_kubernetes_pod_name]
    separator: ;
    regex: (.*)
    target_label: pod
    replacement: $1
    action: replace
  - source_labels: [__meta_kubernetes_service_name]
    separator: ;
    regex: (.*)
    target_label: service
    replacement: $1
    action: replace
  - source_labels: [__meta_kubernetes_service_name]
    separator: ;
    regex: (.*)
    target_label: job
    replacement: ${1}
    action: replace
{%- if rule_files %}
rule_files:
{%- for file in rule_files %}
  - {{ file }}
{%- endfor %}
{%- endif %}
"#;

const PROMETHEUS_RULE_TEMPLATE: &str = r#"groups:
- name: lotus
  rules:
{%- for alert in alerts %}
  - alert: {{ alert.name|quote }}
    expr: {{ alert.expr|quote }}
    for: {{ alert["for"]|quote }}
{%- endfor %}
  - record: lotus_virtual_user_failure_percentage
    expr: 100 * sum by (job) (lotus_virtual_user_count{virtual_user_status="failed"}) / sum by (job) (lotus_virtual_user_count{virtual_user_status="started"})
  - record: lotus_grpc_client_completed_rpcs_per_second:method
    expr: sum by (job, grpc_client_method) (rate(lotus_grpc_client_completed_rpcs[1m]))
  - record: lotus_grpc_client_completed_rpcs_per_second:status
    expr: sum by (job, grpc_client_status) (rate(lotus_grpc_client_completed_rpcs[1m]))
  - record: lotus_grpc_client_completed_rpcs_failure_percentage:method
    expr: 100 * sum by (job, grpc_client_method) (rate(lotus_grpc_client_completed_rpcs{grpc_client_status!~"OK|NOT_FOUND|ALREADY_EXISTS"}[1m])) / sum by (job, grpc_client_method) (rate(lotus_grpc_client_completed_rpcs[1m]))
  - record: lotus_grpc_client_roundtrip_latency:method
    expr: sum by (job, grpc_client_method) (rate(lotus_grpc_client_roundtrip_latency_sum[1m])) / sum by (job, grpc_client_method) (rate(lotus_grpc_client_roundtrip_latency_count[1m]))
  - record: lotus_grpc_client_sent_bytes_per_rpc:method
    expr: sum by (job, grpc_client_method) (rate(lotus_grpc_client_sent_bytes_per_rpc_sum[1m])) / sum by (job, grpc_client_method) (rate(lotus_grpc_client_sent_bytes_per_rpc_count[1m]))
  - record: lotus_grpc_client_received_bytes_per_rpc:method
    expr: sum by (job, grpc_client_method) (rate(lotus_grpc_client_received_bytes_per_rpc_sum[1m])) / sum by (job, grpc_client_method) (rate(lotus_grpc_client_received_bytes_per_rpc_count[1m]))
  - record: lotus_http_client_completed_requests_per_second:host:route:method
    expr: sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_completed_count[1m]))
  - record: lotus_http_client_completed_requests_5xx_percentage:host:route:method
    expr: 100 * sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_completed_count{http_client_status=~"5.."}[1m])) / sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_completed_count[1m]))
  - record: lotus_http_client_roundtrip_latency:host:route:method
    expr: sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_roundtrip_latency_sum[1m])) / sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_roundtrip_latency_count[1m]))
  - record: lotus_http_client_sent_bytes:host:route:method
    expr: sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_sent_bytes_sum[1m])) / sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_sent_bytes_count[1m]))
  - record: lotus_http_client_received_bytes:host:route:method
    expr: sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_received_bytes_sum[1m])) / sum by (job, http_client_host, http_client_route, http_client_method) (rate(lotus_http_client_received_bytes_count[1m]))
"#;

/// Double-quoted YAML scalar; JSON string escapes are valid YAML
fn quote(value: String) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_filter("quote", quote);
    env.add_template(PROMETHEUS_CONFIG, PROMETHEUS_CONFIG_TEMPLATE)?;
    env.add_template(PROMETHEUS_RULE, PROMETHEUS_RULE_TEMPLATE)?;
    Ok(env)
}

/// Render the scrape configuration of a test's Prometheus
///
/// Only endpoints of `service_name` in `namespace` are scraped.
pub fn render_prometheus_config(
    name: &str,
    namespace: &str,
    service_name: &str,
    rule_files: &[String],
) -> Result<String, minijinja::Error> {
    environment()?.get_template(PROMETHEUS_CONFIG)?.render(context! {
        name,
        namespace,
        service_name,
        rule_files,
    })
}

/// Render the alerting and recording rules; one alert per check
pub fn render_prometheus_rules(alerts: &[LotusCheck]) -> Result<String, minijinja::Error> {
    environment()?
        .get_template(PROMETHEUS_RULE)?
        .render(context! { alerts })
}
