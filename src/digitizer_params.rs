use crate::dgtz::CaenApi;
use crate::session::Digitizer;
use log::info;
use std::fmt::Write;

/// Board identity, derived limits and applied configuration, one
/// `name: value` pair per line.
pub fn describe<A: CaenApi>(dgtz: &Digitizer<A>) -> String {
    let mut out = String::new();
    let board = dgtz.board_info();
    let constants = dgtz.model_constants();
    let global = dgtz.global_config();

    let _ = writeln!(out, "ModelName: {}", board.model_name);
    let _ = writeln!(out, "SerialNum: {}", board.serial_number);
    let _ = writeln!(out, "FamilyCode: {}", board.family_code);
    let _ = writeln!(out, "FormFactor: {}", board.form_factor);
    let _ = writeln!(out, "PCBrev: {}", board.pcb_revision);
    let _ = writeln!(out, "ROC_FwVer: {}", board.roc_firmware);
    let _ = writeln!(out, "AMC_FwVer: {}", board.amc_firmware);
    let _ = writeln!(out, "NumCh: {}", board.channels);
    let _ = writeln!(out, "ADC_Nbit: {}", board.adc_nbits);
    let _ = writeln!(out, "ADC_SamplRate: {}", constants.sample_rate);
    let _ = writeln!(out, "MaxBuffers: {}", dgtz.current_max_buffers());
    let _ = writeln!(out, "CommTransferRate: {}", dgtz.comm_transfer_rate());

    let _ = writeln!(out, "RecordLength: {}", global.record_length);
    let _ = writeln!(out, "PostTrigger: {}%", global.post_trigger_percentage);
    let _ = writeln!(out, "MaxEventsPerRead: {}", global.max_events_per_read);
    let _ = writeln!(out, "DecimationFactor: {}", global.decimation_factor);
    let _ = writeln!(out, "AcqMode: {:?}", global.acq_mode);
    let _ = writeln!(out, "SwTriggerMode: {:?}", global.sw_trigger_mode);
    let _ = writeln!(out, "ExtTriggerMode: {:?}", global.ext_trigger_mode);
    let _ = writeln!(out, "ChTriggerMode: {:?}", global.ch_trigger_mode);
    let _ = writeln!(out, "ExtAsGate: {}", global.ext_as_gate);
    let _ = writeln!(out, "TriggerPolarity: {:?}", global.trigger_polarity);
    let _ = writeln!(out, "IOlevel: {:?}", global.io_level);
    let _ = writeln!(out, "MemoryFullMode: {}", global.memory_full_mode);
    let _ = writeln!(out, "MajorityLevel: {}", global.majority_level);
    let _ = writeln!(out, "MajorityWindow: {}", global.majority_coincidence_window);

    for (g, group) in dgtz.group_configs().iter().enumerate() {
        if !group.enabled {
            continue;
        }
        let _ = writeln!(out, "TriggerMask[{g}]: {:#04x}", group.trigger_mask.pack());
        let _ = writeln!(out, "AcquisitionMask[{g}]: {:#04x}", group.acquisition_mask.pack());
        let _ = writeln!(out, "DCOffset[{g}]: {:#06x}", group.dc_offset);
        let _ = writeln!(out, "DCRange[{g}]: {} Vpp", dgtz.voltage_range(g));
        let _ = writeln!(
            out,
            "TriggerThr[{g}]: {} ({:.4} V)",
            group.trigger_threshold,
            dgtz.adc_counts_to_volts(group.trigger_threshold, g)
        );
        let _ = writeln!(out, "DCCorrections[{g}]: {:?}", group.dc_corrections);
    }

    if out.ends_with('\n') {
        out.pop();
    }
    out
}

pub fn log_all<A: CaenApi>(dgtz: &Digitizer<A>) {
    info!("Digitizer {} parameters:\n{}", dgtz.model(), describe(dgtz));
}
