//! Command-line runner for the bundled demo keywords.
//!
//! ```bash
//! # List the registered keywords as descriptor exports
//! keyword-runner --list
//!
//! # Run one keyword and print the result as JSON
//! keyword-runner --keyword Echo --input '{"message": "hi"}'
//!
//! # Exercise the timeout path
//! keyword-runner --keyword Sleep --input '{"ms": 5000}' --timeout-ms 200
//! ```

use std::time::Duration;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use clap::Parser;
use keyword_core::{Invocation, Properties, Value, DEFAULT_KEYWORD_TIMEOUT_MS};
use keyword_engine::logging::{self, LogFormat};
use keyword_engine::{
    EngineConfig, Keyword, KeywordContext, KeywordDefinition, KeywordRunner, KeywordSet,
};

#[derive(Parser, Debug)]
#[command(name = "keyword-runner")]
#[command(about = "Runs a demo keyword and prints the execution result as JSON")]
struct Args {
    /// Keyword to run
    #[arg(long, short)]
    keyword: Option<String>,

    /// Keyword input, a JSON object
    #[arg(long, short, default_value = "{}")]
    input: String,

    /// Call property, repeatable: `-p key=value`
    #[arg(long = "property", short = 'p', value_parser = parse_property)]
    properties: Vec<(String, String)>,

    /// Per-call timeout override in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Validate required and optional properties
    #[arg(long)]
    validate: bool,

    /// Report every keyword fault as a technical error
    #[arg(long)]
    always_propagate: bool,

    /// Print the registered keywords and exit
    #[arg(long)]
    list: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "KEYWORD_LOG_FORMAT")]
    log_format: LogFormat,

    /// Timeout for keywords that declare none
    #[arg(long, env = "KEYWORD_DEFAULT_TIMEOUT_MS", default_value_t = DEFAULT_KEYWORD_TIMEOUT_MS)]
    default_timeout_ms: u64,

    /// Time a timed-out keyword is given to acknowledge cancellation
    #[arg(long, env = "KEYWORD_CANCELLATION_GRACE_MS", default_value_t = 100)]
    grace_ms: u64,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

/// Sleeps for `ms` milliseconds unless cancelled first.
struct Sleep;

#[async_trait]
impl Keyword for Sleep {
    async fn run(&mut self, ctx: &KeywordContext) -> anyhow::Result<()> {
        let ms = ctx
            .input_value("ms")
            .and_then(Value::as_u64)
            .context("input 'ms' must be a non-negative integer")?;
        ctx.output().start_measure("sleep");
        tokio::select! {
            () = ctx.cancelled() => {
                ctx.output().stop_measure();
                ctx.output().add("cancelled", true);
            }
            () = tokio::time::sleep(Duration::from_millis(ms)) => {
                ctx.output().stop_measure();
                ctx.output().add("slept_ms", ms);
            }
        }
        Ok(())
    }
}

fn demo_module() -> KeywordSet {
    KeywordSet::new("demo")
        .with(
            KeywordDefinition::from_fn("echo", |ctx| {
                for (key, value) in ctx.input() {
                    ctx.output().add(key.clone(), value.clone());
                }
                Ok(())
            })
            .named("Echo")
            .described("Copies its input to its output"),
        )
        .with(
            KeywordDefinition::from_fn("greet", |ctx| {
                let greeting = ctx.property("greeting").unwrap_or("Hello");
                let name = ctx.input_str("name").unwrap_or("world");
                ctx.output().add("message", format!("{greeting}, {name}!"));
                Ok(())
            })
            .named("Greet")
            .described("Greets `name` using the `greeting` property")
            .optional("greeting"),
        )
        .with(
            KeywordDefinition::new("sleep", || Sleep)
                .named("Sleep")
                .described("Sleeps for `ms` milliseconds, honoring cancellation"),
        )
        .with(
            KeywordDefinition::from_fn("fail", |ctx| {
                let message = ctx.input_str("message").unwrap_or("requested failure");
                bail!("{message}")
            })
            .named("Fail")
            .described("Fails with `message`"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_format, "keyword_engine=info,keyword_runner=info")?;

    let config = EngineConfig {
        default_timeout_ms: args.default_timeout_ms,
        cancellation_grace_ms: args.grace_ms,
        ..EngineConfig::default()
    };
    let module = demo_module();
    let runner = KeywordRunner::with_config(&[&module], Properties::new(), config)?;

    if args.list {
        println!("{}", serde_json::to_string_pretty(&runner.registry().descriptors())?);
        return Ok(());
    }

    let Some(keyword) = args.keyword else {
        bail!("--keyword is required unless --list is given");
    };
    let Value::Object(payload) =
        serde_json::from_str::<Value>(&args.input).context("--input is not valid JSON")?
    else {
        bail!("--input must be a JSON object");
    };

    let mut invocation = Invocation::new(keyword)
        .with_payload(payload)
        .with_properties(args.properties.into_iter().collect());
    invocation.call_timeout_millis = args.timeout_ms;
    invocation.validate_properties = args.validate;
    invocation.always_propagate_error = args.always_propagate;

    let result = runner.invoke(invocation).await;
    runner.close();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
