//! Record tables of the Patchmaster bundle format.
//!
//! Every table is compiled on first use and shared for the process lifetime.
//! Names are the field names exposed through [`Record`](super::Record) and
//! [`TreeNode::field`](crate::tree::TreeNode::field).  Filler and spare
//! fields are consumed but omitted from decoded records.

use std::sync::{Arc, OnceLock};

use super::{field, nested, RecordSchema, SchemaError};

pub const BUNDLE_ITEM_SIZE:    usize = 16;
pub const BUNDLE_HEADER_SIZE:  usize = 256;
pub const ROOT_RECORD_SIZE:    usize = 544;
pub const GROUP_RECORD_SIZE:   usize = 128;
pub const SERIES_RECORD_SIZE:  usize = 1120;
pub const SWEEP_RECORD_SIZE:   usize = 160;
pub const TRACE_RECORD_SIZE:   usize = 296;
pub const USER_PARAM_SIZE:     usize = 40;
pub const AMPLIFIER_STATE_SIZE: usize = 400;
pub const LOCKIN_PARAMS_SIZE:  usize = 96;

/// Number of catalog slots in the bundle header.
pub const BUNDLE_ITEM_COUNT: usize = 12;

type Cell = OnceLock<Result<Arc<RecordSchema>, SchemaError>>;

fn cached(cell: &'static Cell, build: fn() -> Result<Arc<RecordSchema>, SchemaError>)
    -> Result<Arc<RecordSchema>, SchemaError>
{
    cell.get_or_init(build).clone()
}

// ── Bundle header ────────────────────────────────────────────────────────────

pub fn bundle_item() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("BundleItem", [
            field("Start", "i"),
            field("Length", "i"),
            field("Extension", "8s").text(),
        ], Some(BUNDLE_ITEM_SIZE))
    })
}

pub fn bundle_header() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("BundleHeader", [
            field("Signature", "8s").text(),
            field("Version", "32s").text(),
            field("Time", "d"),
            field("Items", "i"),
            field("IsLittleEndian", "12s"),
            nested("BundleItems", bundle_item()?.repeat(BUNDLE_ITEM_COUNT)?),
        ], Some(BUNDLE_HEADER_SIZE))
    })
}

// ── Tree levels ──────────────────────────────────────────────────────────────

pub fn root_record() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("Root", [
            field("Version", "i"),
            field("Mark", "i"),
            field("VersionName", "32s").text(),
            field("AuxFileName", "80s").text(),
            field("RootText", "400s").text(),
            field("StartTime", "d"),
            field("MaxSamples", "i"),
            field("CRC", "i"),
            field("Features", "h"),
            field("Filler1", "h").omit(),
            field("Filler2", "i").omit(),
        ], Some(ROOT_RECORD_SIZE))
    })
}

pub fn group_record() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("Group", [
            field("Mark", "i"),
            field("Label", "32s").text(),
            field("Text", "80s").text(),
            field("ExperimentNumber", "i"),
            field("GroupCount", "i"),
            field("CRC", "i"),
        ], Some(GROUP_RECORD_SIZE))
    })
}

pub fn user_param_descr() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("UserParamDescr", [
            field("Name", "32s").text(),
            field("Unit", "8s").text(),
        ], Some(USER_PARAM_SIZE))
    })
}

pub fn lockin_params() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("LockInParams", [
            field("ExtCalPhase", "d"),
            field("ExtCalAtten", "d"),
            field("PLPhase", "d"),
            field("PLPhaseY1", "d"),
            field("PLPhaseY2", "d"),
            field("UsedPhaseShift", "d"),
            field("UsedAttenuation", "d"),
            field("Spares2", "8s").omit(),
            field("ExtCalValid", "?"),
            field("PLPhaseValid", "?"),
            field("LockInMode", "c"),
            field("CalMode", "c"),
            field("Spares", "28s").omit(),
        ], Some(LOCKIN_PARAMS_SIZE))
    })
}

pub fn amplifier_state() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        let mut fields = vec![field("StateVersion", "8s").text()];
        fields.extend([
            "RealCurrentGain", "RealF2Bandwidth", "F2Frequency", "RsValue", "RsFraction",
            "GLeak", "CFastAmp1", "CFastAmp2", "CFastTau", "CSlow", "GSeries",
            "StimDacScale", "CCStimScale", "VHold", "LastVHold", "VpOffset",
            "VLiquidJunction", "CCIHold", "CSlowStimVolts", "CCTrackVHold",
            "TimeoutLength", "SearchDelay", "MConductance", "MCapacitance",
        ].map(|name| field(name, "d")));
        fields.push(field("SerialNumber", "8s").text());
        fields.extend([
            "E9Boards", "CSlowCycles", "IMonAdc", "VMonAdc", "MuxAdc", "TstDac",
            "StimDac", "StimDacOffset", "MaxDigitalBit",
        ].map(|name| field(name, "h")));
        fields.extend(["SpareInt1", "SpareInt2", "SpareInt3"].map(|name| field(name, "h").omit()));
        fields.extend([
            "AmplKind", "IsEpc9N", "ADBoard", "BoardVersion", "ActiveE9Board", "Mode",
            "Range", "F2Response", "RsOn", "CSlowRange", "CCRange", "CCGain",
            "CSlowToTstDac", "StimPath", "CCTrackTau", "WasClipping", "RepetitiveCSlow",
            "LastCSlowRange", "Locked", "CanCCFast", "CanLowCCRange", "CanHighCCRange",
            "CanCCTracking", "HasVmonPath", "HasNewCCMode", "Selector", "HoldInverted",
            "AutoCFast", "AutoCSlow", "HasVmonX100", "TestDacOn", "QMuxAdcOn",
        ].map(|name| field(name, "c")));
        fields.extend(["RealImon1Bandwidth", "StimScale"].map(|name| field(name, "d")));
        fields.extend([
            "Gain", "Filter1", "StimFilterOn", "RsSlow", "Old1", "CCCFastOn",
            "CCFastSpeed", "F2Source", "TestRange", "TestDacPath", "MuxChannel",
            "MuxGain64", "VmonX100", "IsQuadro",
        ].map(|name| field(name, "c")));
        fields.extend(["SpareBool4", "SpareBool5"].map(|name| field(name, "c").omit()));
        fields.extend(["StimFilterHz", "RsTau"].map(|name| field(name, "d")));
        fields.extend(["FilterOffsetDac", "ReferenceDac"].map(|name| field(name, "h")));
        fields.extend(["SpareInt6", "SpareInt7"].map(|name| field(name, "h").omit()));
        fields.push(field("Spares1", "24s").omit());
        fields.push(field("CalibDate", "16s").text());
        fields.push(field("SelHold", "d"));
        fields.push(field("Spares2", "32s").omit());
        RecordSchema::build("AmplifierState", fields, Some(AMPLIFIER_STATE_SIZE))
    })
}

pub fn series_record() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        let params = user_param_descr()?.repeat(4)?;
        RecordSchema::build("Series", [
            field("Mark", "i"),
            field("Label", "32s").text(),
            field("Comment", "80s").text(),
            field("SeriesCount", "i"),
            field("NumberSweeps", "i"),
            field("AmplStateOffset", "i"),
            field("AmplStateSeries", "i"),
            field("SeriesType", "c"),
            field("Filler1", "c").omit(),
            field("Filler2", "c").omit(),
            field("Filler3", "c").omit(),
            field("Time", "d"),
            field("PageWidth", "d"),
            nested("SwUserParamDescr", params.clone()),
            field("Filler4", "32s").omit(),
            field("SeUserParams", "4d"),
            nested("LockInParams", lockin_params()?),
            nested("AmplifierState", amplifier_state()?),
            field("Username", "80s").text(),
            nested("SeUserParamDescr", params),
            field("Filler5", "i").omit(),
            field("CRC", "i"),
        ], Some(SERIES_RECORD_SIZE))
    })
}

pub fn sweep_record() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("Sweep", [
            field("Mark", "i"),
            field("Label", "32s").text(),
            field("AuxDataFileOffset", "i"),
            field("StimCount", "i"),
            field("SweepCount", "i"),
            field("Time", "d"),
            field("Timer", "d"),
            field("SwUserParams", "4d"),
            field("Temperature", "d"),
            field("OldIntSol", "i"),
            field("OldExtSol", "i"),
            field("DigitalIn", "h"),
            field("SweepKind", "h"),
            field("Filler1", "i").omit(),
            field("Markers", "4d"),
            field("Filler2", "i").omit(),
            field("CRC", "i"),
        ], Some(SWEEP_RECORD_SIZE))
    })
}

pub fn trace_record() -> Result<Arc<RecordSchema>, SchemaError> {
    static CELL: Cell = OnceLock::new();
    cached(&CELL, || {
        RecordSchema::build("Trace", [
            field("Mark", "i"),
            field("Label", "32s").text(),
            field("TraceCount", "i"),
            field("Data", "i"),
            field("DataPoints", "i"),
            field("InternalSolution", "i"),
            field("AverageCount", "i"),
            field("LeakCount", "i"),
            field("LeakTraces", "i"),
            field("DataKind", "h"),
            field("Filler1", "h").omit(),
            field("RecordingMode", "c"),
            field("AmplIndex", "c"),
            field("DataFormat", "c"),
            field("DataAbscissa", "c"),
            field("DataScaler", "d"),
            field("TimeOffset", "d"),
            field("ZeroData", "d"),
            field("YUnit", "8s").text(),
            field("XInterval", "d"),
            field("XStart", "d"),
            field("XUnit", "8s").text(),
            field("YRange", "d"),
            field("YOffset", "d"),
            field("Bandwidth", "d"),
            field("PipetteResistance", "d"),
            field("CellPotential", "d"),
            field("SealResistance", "d"),
            field("CSlow", "d"),
            field("GSeries", "d"),
            field("RsValue", "d"),
            field("GLeak", "d"),
            field("MConductance", "d"),
            field("LinkDAChannel", "i"),
            field("ValidYrange", "c"),
            field("AdcMode", "c"),
            field("AdcChannel", "h"),
            field("Ymin", "d"),
            field("Ymax", "d"),
            field("SourceChannel", "i"),
            field("ExternalSolution", "i"),
            field("CM", "d"),
            field("GM", "d"),
            field("Phase", "d"),
            field("DataCRC", "i"),
            field("CRC", "i"),
            field("GS", "d"),
            field("SelfChannel", "i"),
            field("Filler2", "i").omit(),
        ], Some(TRACE_RECORD_SIZE))
    })
}
