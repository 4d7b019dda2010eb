//! Adapter bring-up: enumeration, identity readout, PDO mapping and the
//! PREOP → OP transition, plus the [`ProcessBus`] seam the cycle engine
//! drives.

use ethercrab::{
    std::{ethercat_now, tx_rx_task},
    subdevice_group::Op,
    DefaultLock, MainDevice, MainDeviceConfig, PduStorage, SubDevice, SubDeviceGroup,
    SubDeviceRef, SubDeviceState, Timeouts,
};
use ethercrab_wire::EtherCrabWireWrite;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;

use crate::codec::{input_frame_len, output_frame_len};
use crate::config::BusConfig;
use crate::error::SetupError;

/// Maximum number of SubDevices that can be stored. This must be a power of 2 greater than 1.
pub const MAX_SUBDEVICES: usize = 8;
/// Maximum PDU data payload size - set this to the max PDI size or higher.
const MAX_PDU_DATA: usize = PduStorage::element_size(1100);
/// Maximum number of EtherCAT frames that can be in flight at any one time.
const MAX_FRAMES: usize = 16;
/// Maximum total PDI length. A fully mapped drive uses 42 + 40 bytes.
pub const PDI_LEN: usize = 768;

static PDU_STORAGE: PduStorage<MAX_FRAMES, MAX_PDU_DATA> = PduStorage::new();

const RX_PDO_ASSIGN: u16 = 0x1C12;
const TX_PDO_ASSIGN: u16 = 0x1C13;
/// Fixed output mapping objects: default outputs and the config module.
const RX_PDO_DEFAULT: u16 = 0x1700;
const RX_PDO_CONFIG: u16 = 0x1708;
/// First parameter-channel mapping object; channels are consecutive.
const RX_PDO_PAR_BASE: u16 = 0x1728;
/// Fixed input mapping objects: default inputs and the config module.
const TX_PDO_DEFAULT: u16 = 0x1B00;
const TX_PDO_CONFIG: u16 = 0x1B08;
/// First monitoring-channel mapping object; channels are consecutive.
const TX_PDO_MON_BASE: u16 = 0x1B28;

/// Spare mapping objects the drive ships non-empty; cleared at bring-up.
const SPARE_TX_MAPPING: u16 = 0x1A20;
const SPARE_RX_MAPPING: u16 = 0x1620;

/// Device name object in the identity block.
const DEVICE_NAME_OBJECT: u16 = 0x1008;

/// Per-subdevice operational probe budget inside the cycle.
const STATE_PROBE_TIMEOUT: Duration = Duration::from_micros(500);

/// The bus I/O surface the cycle engine runs against. Implemented by
/// [`EthercatBus`] for real hardware and by a scripted mock in the engine
/// tests.
pub trait ProcessBus: Send + Sized + 'static {
    fn subdevice_count(&self) -> usize;

    /// Byte length of one subdevice's input frame.
    fn input_frame_len(&self) -> usize;

    /// Probes whether the subdevice still reports operational state.
    /// Bounded to well under a cycle; a timeout counts as a failed probe.
    async fn subdevice_operational(&mut self, index: usize) -> bool;

    /// One send-then-receive process-data exchange.
    async fn exchange(&mut self) -> Result<(), ethercrab::error::Error>;

    /// Copies the subdevice's raw input bytes into `dst`.
    fn read_inputs(&self, index: usize, dst: &mut [u8]);

    /// Replaces the subdevice's raw output bytes for the next exchange.
    fn write_outputs(&mut self, index: usize, src: &[u8]);

    /// Leaves cyclic operation: transitions the bus to SAFE-OP and releases
    /// it. Failures are logged, not propagated; teardown is best-effort.
    async fn shutdown(self);
}

/// Owns the PDU storage split and the TX/RX thread. Create once per
/// process; bring-up can then be retried until the drives respond.
pub struct EthercatMaster {
    maindevice: Arc<MainDevice<'static>>,
    log_key: String,
}

impl EthercatMaster {
    /// Opens the raw-Ethernet adapter and starts the TX/RX thread.
    pub fn new(interface: &str) -> Result<Self, SetupError> {
        let (tx, rx, pdu_loop) = PDU_STORAGE.try_split().map_err(|_| {
            SetupError::AdapterOpen(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "PDU storage already split; only one master per process",
            ))
        })?;

        let maindevice = Arc::new(MainDevice::new(
            pdu_loop,
            Timeouts {
                pdu: Duration::from_millis(2),
                state_transition: Duration::from_millis(50),
                wait_loop_delay: Duration::from_millis(2),
                mailbox_response: Duration::from_millis(1000),
                ..Default::default()
            },
            MainDeviceConfig::default(),
        ));

        let tx_rx = tx_rx_task(interface, tx, rx).map_err(SetupError::AdapterOpen)?;
        thread_priority::ThreadBuilder::default()
            .name("ethercat-tx-rx")
            .spawn(move |priority| {
                if let Err(e) = priority {
                    log::warn!(target: "ethercat-tx-rx", "could not raise thread priority: {e:?}");
                }
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("build tx/rx runtime");
                if let Err(e) = runtime.block_on(tx_rx) {
                    log::error!(target: "ethercat-tx-rx", "TX/RX task failed: {e}");
                }
            })
            .map_err(SetupError::AdapterOpen)?;

        Ok(Self {
            maindevice,
            log_key: "linmot-bus".to_string(),
        })
    }

    /// Enumerates the bus, reads each drive's identity, writes the PDO map
    /// for the configured channel counts and transitions into OP.
    ///
    /// SDO failures here are commonly transient right after drive power-up;
    /// callers are expected to retry.
    pub async fn bring_up(&self, config: &BusConfig) -> Result<EthercatBus, SetupError> {
        config.validate()?;

        let mut group = self
            .maindevice
            .init_single_group::<MAX_SUBDEVICES, PDI_LEN>(ethercat_now)
            .await
            .map_err(|e| SetupError::state_transition(SubDeviceState::PreOp, e))?;

        check_subdevice_count(config.expected_subdevices, group.len())?;

        let mut names = Vec::with_capacity(group.len());
        for subdevice in group.iter(&self.maindevice) {
            let name = read_drive_type(&subdevice, &self.log_key).await;
            log::info!(
                target: &self.log_key,
                "subdevice {:#06x} identifies as `{}`",
                subdevice.configured_address(),
                name
            );
            configure_pdo_map(
                &subdevice,
                config.monitoring_channels,
                config.parameter_channels,
            )
            .await?;
            names.push(name);
        }

        let group = group
            .into_op(&self.maindevice)
            .await
            .map_err(|e| SetupError::state_transition(SubDeviceState::Op, e))?;

        log::info!(target: &self.log_key, "bus is operational with {} subdevices", group.len());

        Ok(EthercatBus {
            maindevice: Arc::clone(&self.maindevice),
            group,
            names,
            input_len: input_frame_len(config.monitoring_channels),
            output_len: output_frame_len(config.parameter_channels),
            log_key: self.log_key.clone(),
        })
    }
}

fn check_subdevice_count(expected: usize, found: usize) -> Result<(), SetupError> {
    if expected != found {
        return Err(SetupError::SlaveCountMismatch { expected, found });
    }
    Ok(())
}

async fn write_sdo<S, T>(
    subdevice: &SubDeviceRef<'_, S>,
    index: u16,
    sub_index: u8,
    value: T,
) -> Result<(), SetupError>
where
    S: Deref<Target = SubDevice>,
    T: EtherCrabWireWrite,
{
    subdevice
        .sdo_write(index, sub_index, value)
        .await
        .map_err(|e| SetupError::sdo(index, sub_index, e))
}

/// Reads the drive type string from identity object 0x1008, falling back to
/// the EEPROM name. An unreadable name is tolerated.
async fn read_drive_type<S>(subdevice: &SubDeviceRef<'_, S>, log_key: &str) -> String
where
    S: Deref<Target = SubDevice>,
{
    match subdevice.sdo_read::<[u8; 32]>(DEVICE_NAME_OBJECT, 0).await {
        Ok(bytes) => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        Err(e) => {
            log::warn!(
                target: log_key,
                "device name object {DEVICE_NAME_OBJECT:#06x} not readable ({e}), using EEPROM name"
            );
            subdevice.name().to_string()
        }
    }
}

/// Writes the PDO assignments for the requested channel counts: the two
/// fixed entries each way plus the first `par`/`mon` channel objects.
/// Subindex 0 ends up at 2 + P outputs and 2 + M inputs.
async fn configure_pdo_map<S>(
    subdevice: &SubDeviceRef<'_, S>,
    mon_channels: usize,
    par_channels: usize,
) -> Result<(), SetupError>
where
    S: Deref<Target = SubDevice>,
{
    write_sdo(subdevice, RX_PDO_ASSIGN, 0, 0u8).await?;
    write_sdo(subdevice, TX_PDO_ASSIGN, 0, 0u8).await?;
    write_sdo(subdevice, SPARE_TX_MAPPING, 0, 0u8).await?;
    write_sdo(subdevice, SPARE_RX_MAPPING, 0, 0u8).await?;

    let mut outputs: ArrayVec<u16, 6> = ArrayVec::new();
    outputs.push(RX_PDO_DEFAULT);
    outputs.push(RX_PDO_CONFIG);
    for channel in 0..par_channels {
        outputs.push(RX_PDO_PAR_BASE + channel as u16);
    }
    subdevice
        .sdo_write_array(RX_PDO_ASSIGN, outputs.as_slice())
        .await
        .map_err(|e| SetupError::sdo(RX_PDO_ASSIGN, 0, e))?;

    let mut inputs: ArrayVec<u16, 6> = ArrayVec::new();
    inputs.push(TX_PDO_DEFAULT);
    inputs.push(TX_PDO_CONFIG);
    for channel in 0..mon_channels {
        inputs.push(TX_PDO_MON_BASE + channel as u16);
    }
    subdevice
        .sdo_write_array(TX_PDO_ASSIGN, inputs.as_slice())
        .await
        .map_err(|e| SetupError::sdo(TX_PDO_ASSIGN, 0, e))?;

    Ok(())
}

/// A bus in OP state, ready for cyclic exchange. Owned by the cycle engine
/// thread; clients must never touch the adapter.
pub struct EthercatBus {
    maindevice: Arc<MainDevice<'static>>,
    group: SubDeviceGroup<MAX_SUBDEVICES, PDI_LEN, DefaultLock, Op>,
    names: Vec<String>,
    input_len: usize,
    output_len: usize,
    log_key: String,
}

impl EthercatBus {
    /// Drive type strings by bus position, read at bring-up.
    pub fn drive_types(&self) -> &[String] {
        &self.names
    }

    /// Byte length of one subdevice's output frame.
    pub fn output_frame_len(&self) -> usize {
        self.output_len
    }
}

impl ProcessBus for EthercatBus {
    fn subdevice_count(&self) -> usize {
        self.group.len()
    }

    fn input_frame_len(&self) -> usize {
        self.input_len
    }

    async fn subdevice_operational(&mut self, index: usize) -> bool {
        let Ok(subdevice) = self.group.subdevice(&self.maindevice, index) else {
            return false;
        };
        matches!(
            tokio::time::timeout(STATE_PROBE_TIMEOUT, subdevice.status()).await,
            Ok(Ok((SubDeviceState::Op, _)))
        )
    }

    async fn exchange(&mut self) -> Result<(), ethercrab::error::Error> {
        self.group.tx_rx(&self.maindevice).await.map(|_wkc| ())
    }

    fn read_inputs(&self, index: usize, dst: &mut [u8]) {
        let Ok(subdevice) = self.group.subdevice(&self.maindevice, index) else {
            return;
        };
        let inputs = subdevice.inputs_raw();
        let n = dst.len().min(inputs.len());
        dst[..n].copy_from_slice(&inputs[..n]);
    }

    fn write_outputs(&mut self, index: usize, src: &[u8]) {
        let Ok(subdevice) = self.group.subdevice(&self.maindevice, index) else {
            return;
        };
        let mut outputs = subdevice.outputs_raw_mut();
        let n = outputs.len().min(src.len());
        outputs[..n].copy_from_slice(&src[..n]);
    }

    async fn shutdown(self) {
        match self.group.into_safe_op(&self.maindevice).await {
            Ok(_) => log::info!(target: &self.log_key, "bus transitioned to SAFE-OP"),
            Err(e) => {
                log::error!(target: &self.log_key, "SAFE-OP transition failed during teardown: {e}")
            }
        }
    }
}
