//! Per-tick pin recorder with Value Change Dump output.
//!
//! Samples the controller's pins and state once per tick and renders them
//! as a VCD text file that any waveform viewer opens. Only value changes
//! are written, so long pulses cost almost nothing once rendered.

use crate::dispatch::CtlState;
use crate::{Controller, Inputs, Outputs, CLOCK_HZ};

/// One recorded tick.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub tick: u64,
    pub inputs: Inputs,
    pub outputs: Outputs,
    pub state: CtlState,
}

/// (identifier, width, name)
const SIGNALS: [(char, u8, &str); 12] = [
    ('!', 1, "cs_n"),
    ('"', 1, "sck"),
    ('#', 1, "mosi"),
    ('$', 1, "prog_en"),
    ('%', 4, "col_sense"),
    ('&', 1, "miso"),
    ('\'', 1, "ready"),
    ('(', 1, "error"),
    (')', 1, "prog_done"),
    ('*', 8, "row_drive"),
    ('+', 4, "state"),
    (',', 1, "clk"),
];

pub struct VcdRecorder {
    samples: Vec<Sample>,
    capacity: usize,
    /// Samples dropped after the recorder filled up
    pub dropped: u64,
}

impl VcdRecorder {
    pub fn new(capacity: usize) -> Self {
        VcdRecorder { samples: Vec::new(), capacity, dropped: 0 }
    }

    pub fn sample(&mut self, ctl: &Controller) {
        if self.samples.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.samples.push(Sample {
            tick: ctl.tick,
            inputs: ctl.inputs(),
            outputs: ctl.outputs(),
            state: ctl.state(),
        });
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize { self.samples.len() }

    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.dropped = 0;
    }

    fn values(s: &Sample) -> [u32; 12] {
        let i = &s.inputs;
        let o = &s.outputs;
        [
            i.cs_n as u32, i.sck as u32, i.mosi as u32, i.prog_en as u32,
            crate::crossbar::sense(i.col_sense) as u32,
            o.miso as u32, o.ready as u32, o.error as u32, o.prog_done as u32,
            o.row_drive as u32, s.state.code() as u32,
            0,
        ]
    }

    /// Render the recording as VCD text. Each tick is one clock period;
    /// `clk` is high for the first half of it.
    pub fn to_vcd(&self) -> String {
        let period_ns = 1_000_000_000 / CLOCK_HZ as u64;
        let half = (period_ns / 2).max(1);
        let mut out = String::with_capacity(256 + self.samples.len() * 16);
        out.push_str("$date recorded by xbar-core $end\n");
        out.push_str("$timescale 1ns $end\n");
        out.push_str("$scope module xbar $end\n");
        for (id, width, name) in SIGNALS.iter() {
            if *width == 1 {
                out.push_str(&format!("$var wire 1 {} {} $end\n", id, name));
            } else {
                out.push_str(&format!("$var wire {} {} {} [{}:0] $end\n", width, id, name, width - 1));
            }
        }
        out.push_str("$upscope $end\n$enddefinitions $end\n");

        let mut prev: Option<[u32; 12]> = None;
        for s in &self.samples {
            let t = s.tick * period_ns;
            let vals = Self::values(s);
            out.push_str(&format!("#{}\n", t));
            if prev.is_none() { out.push_str("$dumpvars\n"); }
            out.push_str(&format!("1{}\n", SIGNALS[11].0));
            for (idx, (id, width, _)) in SIGNALS.iter().enumerate().take(11) {
                if prev.map_or(true, |p| p[idx] != vals[idx]) {
                    out.push_str(&format_value(*id, *width, vals[idx]));
                }
            }
            if prev.is_none() { out.push_str("$end\n"); }
            out.push_str(&format!("#{}\n0{}\n", t + half, SIGNALS[11].0));
            prev = Some(vals);
        }
        out
    }
}

fn format_value(id: char, width: u8, value: u32) -> String {
    if width == 1 {
        format!("{}{}\n", value & 1, id)
    } else {
        format!("b{:0w$b} {}\n", value, id, w = width as usize)
    }
}
