//! # Tactical report format
//! `CALLSIGN//SERIAL//NUM_TARGETS//CONFIDENCE//PLATFORM//ZONE//HHMM//REM: remarks`
//!
//! e.g. `PR01//I005//2//PROBABLE//ORCA//CLINTON//0211//REM: VES TOKITAE OUTBOUND`

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Unknown,
    Possible,
    Probable,
    Confirmed,
}

impl Confidence {
    /// Classifier score → level.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.9 {
            Confidence::Confirmed
        } else if score >= 0.7 {
            Confidence::Probable
        } else if score >= 0.5 {
            Confidence::Possible
        } else {
            Confidence::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Confirmed => "CONFIRMED",
            Confidence::Probable => "PROBABLE",
            Confidence::Possible => "POSSIBLE",
            Confidence::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" => Some(Confidence::Confirmed),
            "PROBABLE" => Some(Confidence::Probable),
            "POSSIBLE" => Some(Confidence::Possible),
            "UNKNOWN" => Some(Confidence::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform code for a known vessel name, by ferry class.
pub fn platform_for_vessel(name: &str) -> Option<&'static str> {
    let code = match name {
        "Tacoma" | "Wenatchee" | "Puyallup" => "WHALE",
        "Hyak" | "Kaleetan" | "Yakima" | "Elwha" | "Walla Walla" | "Spokane" => "EAGLE",
        "Issaquah" | "Kittitas" | "Cathlamet" | "Kitsap" | "Sealth" | "Chelan" => "SALMON",
        "Tokitae" | "Samish" | "Chimacum" | "Suquamish" => "ORCA",
        "Chetzemoka" | "Kennewick" | "Salish" => "SEAL",
        _ => return None,
    };
    Some(code)
}

/// Platform code for a vessel class label (feed class names or classifier labels).
pub fn platform_for_class(class: &str) -> String {
    let norm = class.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    match norm.as_str() {
        "JUMBO_MARK_II" => "WHALE".to_string(),
        "SUPER" => "EAGLE".to_string(),
        "ISSAQUAH" => "SALMON".to_string(),
        "OLYMPIC" => "ORCA".to_string(),
        "KWA_DI_TABIL" => "SEAL".to_string(),
        "" => "UNKNOWN".to_string(),
        _ => norm,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub callsign: String,
    pub serial_number: u32,
    pub num_targets: u32,
    pub confidence: Confidence,
    pub platform: String,
    pub zone: String,
    pub timestamp: DateTime<Utc>,
    pub remarks: String,
    pub vessel_name: Option<String>,
}

impl Report {
    pub fn serial(&self) -> String {
        format!("I{:03}", self.serial_number)
    }

    pub fn hhmm(&self) -> String {
        self.timestamp.format("%H%M").to_string()
    }

    /// Wire form; `REM:` stands alone when there are no remarks.
    pub fn to_line(&self) -> String {
        let rem = if self.remarks.is_empty() {
            "REM:".to_string()
        } else {
            format!("REM: {}", self.remarks)
        };
        [
            self.callsign.clone(),
            self.serial(),
            self.num_targets.to_string(),
            self.confidence.as_str().to_string(),
            self.platform.clone(),
            self.zone.clone(),
            self.hhmm(),
            rem,
        ]
        .join("//")
    }
}

/// Fields for a new report; the generator fills callsign and serial.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    pub num_targets: u32,
    pub confidence: Confidence,
    pub platform: String,
    pub zone: String,
    pub remarks: String,
    pub vessel_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Stamps reports with a callsign and a monotonically increasing serial.
#[derive(Debug)]
pub struct ReportGenerator {
    callsign: String,
    serial: AtomicU32,
}

impl ReportGenerator {
    pub fn new(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            serial: AtomicU32::new(0),
        }
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn current_serial(&self) -> u32 {
        self.serial.load(Ordering::SeqCst)
    }

    /// Start a new shift's numbering; the next report gets `value + 1`.
    pub fn reset_serial(&self, value: u32) {
        self.serial.store(value, Ordering::SeqCst);
    }

    pub fn create(&self, draft: ReportDraft) -> Report {
        let n = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        Report {
            callsign: self.callsign.clone(),
            serial_number: n,
            num_targets: draft.num_targets,
            confidence: draft.confidence,
            platform: draft.platform,
            zone: draft.zone,
            timestamp: draft.timestamp.unwrap_or_else(Utc::now),
            remarks: draft.remarks,
            vessel_name: draft.vessel_name,
        }
    }

    /// Report for a single classifier hit. A known vessel name picks the
    /// platform from the fleet table, otherwise the class label does.
    pub fn from_detection(&self, d: &Detection, zone: &str, now: DateTime<Utc>) -> Report {
        let platform = d
            .vessel_name
            .as_deref()
            .and_then(platform_for_vessel)
            .map(str::to_string)
            .unwrap_or_else(|| platform_for_class(&d.class_label));

        let mut remarks = Vec::new();
        if let Some(name) = d.vessel_name.as_deref().filter(|n| !n.is_empty()) {
            remarks.push(format!("VES {}", name.to_uppercase()));
        }
        if let Some(dir) = d.direction.as_deref().filter(|s| !s.is_empty()) {
            remarks.push(dir.to_uppercase());
        }

        self.create(ReportDraft {
            num_targets: 1,
            confidence: Confidence::from_score(d.confidence),
            platform,
            zone: zone.to_string(),
            remarks: remarks.join(" "),
            vessel_name: d.vessel_name.clone(),
            timestamp: Some(now),
        })
    }

    pub fn check_in(&self, now: DateTime<Utc>) -> String {
        format!("\"{} ONSTA {}\"", self.callsign, now.format("%H%MZ"))
    }

    pub fn check_out(&self, now: DateTime<Utc>) -> String {
        format!("\"{} OFF-STA {}\"", self.callsign, now.format("%H%MZ"))
    }
}

/// Components of a report line, as typed by an operator or read back from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedReport {
    pub callsign: String,
    pub serial: String,
    pub num_targets: u32,
    pub confidence: String,
    pub platform: String,
    pub zone: String,
    pub hhmm: String,
    pub remarks: String,
}

pub fn parse_report(line: &str) -> Option<ParsedReport> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^([A-Z0-9]+)//([A-Z]\d{3,})//(\d+)//([A-Z]+)//([A-Z_]+)//([A-Z_]+)//(\d{4})//REM:(.*)$",
        )
        .expect("report regex")
    });
    let caps = re.captures(line.trim())?;
    Some(ParsedReport {
        callsign: caps[1].to_string(),
        serial: caps[2].to_string(),
        num_targets: caps[3].parse().ok()?,
        confidence: caps[4].to_string(),
        platform: caps[5].to_string(),
        zone: caps[6].to_string(),
        hhmm: caps[7].to_string(),
        remarks: caps[8].trim().to_string(),
    })
}
