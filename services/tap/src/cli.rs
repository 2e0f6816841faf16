// Command-line surface. Flags override environment and YAML configuration.
use anyhow::Result;
use clap::Parser;
use tap_common::ids::TopicArn;

use crate::config::{AckMode, OutputMode, TapConfig};

#[derive(Parser, Debug)]
#[command(name = "topic-tap")]
#[command(about = "Attach a temporary queue to a topic and print what it receives")]
#[command(version)]
pub struct Args {
    /// ARN of the existing topic to tap
    pub topic: TopicArn,

    /// Override the default region
    #[arg(long)]
    pub region: Option<String>,

    /// What to do with messages once printed
    #[arg(long, value_enum)]
    pub ack: Option<AckMode>,

    /// Long-poll wait per receive call in seconds (0-20)
    #[arg(long)]
    pub wait_time: Option<i32>,

    /// Messages per receive call (1-10)
    #[arg(long)]
    pub max_messages: Option<i32>,

    /// Print the whole delivered body instead of the published message
    #[arg(long)]
    pub raw: bool,
}

impl Args {
    pub fn apply(&self, config: &mut TapConfig) -> Result<()> {
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(ack) = self.ack {
            config.ack_mode = ack;
        }
        if let Some(wait) = self.wait_time {
            config.wait_time_seconds = wait;
        }
        if let Some(max) = self.max_messages {
            config.max_messages = max;
        }
        if self.raw {
            config.output_mode = OutputMode::Raw;
        }
        config.validate()
    }
}
