#![allow(dead_code)]

use pi30_bridge::prelude::*;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn common_setup() {
    pi30_bridge::init_logging("debug");
}

/// Scripted inverter: answers each command with a canned reply, or silence.
pub struct FakeLink {
    replies: HashMap<Command, String>,
    delay: Duration,
    pub sent: Mutex<Vec<Command>>,
}

impl FakeLink {
    pub fn silent() -> Self {
        Self {
            replies: HashMap::new(),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, command: Command, reply: &str) -> Self {
        self.replies.insert(command, reply.to_owned());
        self
    }

    /// Each exchange blocks this long, like a slow serial line.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }
}

impl Exchange for FakeLink {
    fn exchange(&self, command: Command) -> RawResponse {
        std::thread::sleep(self.delay);
        self.sent.lock().unwrap().push(command);
        self.replies
            .get(&command)
            .map(|reply| RawResponse::from(reply.as_str()))
            .unwrap_or_else(RawResponse::empty)
    }

    fn port(&self) -> &str {
        "fake"
    }
}

pub struct Factory;

impl Factory {
    pub const QPIGS: &'static str =
        "(230.1 50.0 230.0 50.0 0800 0750 030 360 52.3 010 090 045 012.3 180.5 52.1 000 B 00 00 00120";
    pub const QPIGS2: &'static str = "(120.5 3.2 0386";
    pub const QMODI: &'static str = "(B";
    pub const QPIWS: &'static str = "(00000000000000000000000000000000";
    pub const QPIRI: &'static str =
        "(230.0 34.7 230.0 50.0 34.7 8000 8000 48.0 46.0 42.0 56.4 54.0 2 30 060 0 2 3 9 01 0 0 54.0 0 1";

    /// Answers every query like a healthy inverter.
    pub fn healthy_link() -> FakeLink {
        FakeLink::silent()
            .with(Command::Qpigs, Self::QPIGS)
            .with(Command::Qpigs2, Self::QPIGS2)
            .with(Command::Qmodi, Self::QMODI)
            .with(Command::Qpiws, Self::QPIWS)
            .with(Command::Qpiri, Self::QPIRI)
    }

    pub fn config() -> ConfigWrapper {
        let config = Config::from_yaml("inverter:\n  port: /dev/fake\nscheduler:\n  interval: 1\n")
            .unwrap();
        ConfigWrapper::from_config(config)
    }
}
