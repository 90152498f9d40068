pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGPULL CONFIGURATION
# =============================================================================
# logpull polls the provider's request-log API on a fixed period, splits each
# window into provider-sized segments, downloads and normalizes them, and
# forwards events to a sink. A checkpoint records the last window handled so a
# restart resumes where the previous run stopped.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logpull/config.yml
#   3. /etc/logpull/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# SOURCE
# =============================================================================
source:
  # Zone whose request logs are pulled
  zone_tag: $env{LOGPULL_ZONE_TAG}

  # api_base: https://api.cloudflare.com

  # Either a global API key with its account email...
  auth:
    api_key: $env{LOGPULL_API_KEY}
    email: $env{LOGPULL_EMAIL}
  # ...or a service key:
  # auth:
  #   service_key: $env{LOGPULL_SERVICE_KEY}

  # Per-request timeout and retry behaviour for a single segment
  request_timeout: 60s
  max_retries: 3
  retry_interval: 2s

# =============================================================================
# SCHEDULE
# =============================================================================
schedule:
  # Length of each fetch window and time between ticks (1m..=30m)
  period: 10m

  # How far behind the wall clock the newest window ends. The provider does
  # not guarantee complete data for very recent minutes.
  safety_lag: 30m

  # Largest range requested in one call
  max_segment: 120s

  # Abort a tick that has not finished after this long. Unset waits forever.
  # tick_timeout: 20m

# =============================================================================
# WORKERS
# =============================================================================
workers:
  download: 6
  processing: 6

  # Events buffered between processing workers and the sink
  output_buffer: 1000

  # Where downloaded segments are stored until processed
  tmp_dir: tmp_logs/
  delete_after_processing: true

# =============================================================================
# CHECKPOINT
# =============================================================================
checkpoint:
  # Prefix of the checkpoint file/object: {name}-{zone_tag}.state
  name: logpull

  # contiguous: advance only over segments that completed, starting from the
  #             window start (failed segments are fetched again next tick)
  # window:     advance over the whole window even if segments failed
  advance: contiguous

  storage:
    type: disk
    path: /var/lib/logpull/

  # storage:
  #   type: s3
  #   bucket: my-checkpoints
  #   access_key: $env{AWS_ACCESS_KEY_ID}
  #   secret_key: $env{AWS_SECRET_ACCESS_KEY}
  #   region: us-east-1
  #   # endpoint: http://localhost:9000

# =============================================================================
# SINK
# =============================================================================
# One JSON object per line.
sink:
  type: stdout

# sink:
#   type: file
#   path: /var/log/logpull/events.jsonl
"#
    .to_string()
}
