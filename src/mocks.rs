//! Test doubles for everything the logger talks to.
//!
//! Each double is a cheap handle onto shared state, so a test can hand one
//! clone to the code under test and keep another to poke at and inspect.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use hex_literal::hex;

use crate::block_device::{Block, BlockDevice, MemoryBlockDevice};
use crate::peripherals::sht31::crc8;
use crate::peripherals::DrawingSurface;
use crate::sdmmc::proto::{crc16, crc7};
use crate::sdmmc::SpiClock;
use crate::storage::Volume;
use crate::time::{Millis, Uptime};

/// The one error every double reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MockError {
    /// Nobody answered at that address.
    Nack,
    /// The test asked for this call to fail.
    Injected,
}

// ****************************************************************************
//
// Time
//
// ****************************************************************************

/// A delay that returns at once.
pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Uptime the test moves by hand. Sleeping on it moves it too.
#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<Millis>>);

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        ManualClock(Rc::new(Cell::new(start)))
    }

    pub fn now(&self) -> Millis {
        self.0.get()
    }

    pub fn advance(&self, ms: Millis) {
        self.0.set(self.0.get() + ms);
    }
}

impl Uptime for ManualClock {
    fn uptime_ms(&mut self) -> Millis {
        self.now()
    }
}

impl DelayMs<u32> for ManualClock {
    fn delay_ms(&mut self, ms: u32) {
        self.advance(Millis::from(ms));
    }
}

// ****************************************************************************
//
// GPIO
//
// ****************************************************************************

#[derive(Clone)]
pub struct FakeInput {
    level: Rc<Cell<bool>>,
    failing: Rc<Cell<bool>>,
}

impl FakeInput {
    pub fn new(level: bool) -> Self {
        FakeInput {
            level: Rc::new(Cell::new(level)),
            failing: Rc::new(Cell::new(false)),
        }
    }

    pub fn set(&self, level: bool) {
        self.level.set(level);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl InputPin for FakeInput {
    type Error = MockError;

    fn is_high(&self) -> Result<bool, MockError> {
        if self.failing.get() {
            return Err(MockError::Injected);
        }
        Ok(self.level.get())
    }

    fn is_low(&self) -> Result<bool, MockError> {
        self.is_high().map(|h| !h)
    }
}

#[derive(Default)]
struct OutputState {
    level: Option<bool>,
    history: Vec<bool>,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct FakeOutput(Rc<RefCell<OutputState>>);

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pin level, once anything has been written.
    pub fn level(&self) -> Option<bool> {
        self.0.borrow().level
    }

    /// Every level written, in order.
    pub fn history(&self) -> Vec<bool> {
        self.0.borrow().history.clone()
    }

    pub fn fail(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }

    fn drive(&mut self, level: bool) -> Result<(), MockError> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(MockError::Injected);
        }
        state.level = Some(level);
        state.history.push(level);
        Ok(())
    }
}

impl OutputPin for FakeOutput {
    type Error = MockError;

    fn set_low(&mut self) -> Result<(), MockError> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), MockError> {
        self.drive(true)
    }
}

// ****************************************************************************
//
// I2C bus with an SHT31 and a DS3231 on it
//
// ****************************************************************************

const SHT31: u8 = 0x44;
const DS3231: u8 = 0x68;

struct BusState {
    present: Vec<u8>,
    sample: (f32, f32),
    corrupt_crc: bool,
    clock: [u8; 7],
    writes: Vec<(u8, Vec<u8>)>,
}

#[derive(Clone)]
pub struct FakeBus(Rc<RefCell<BusState>>);

impl FakeBus {
    /// Both devices present, 21.5 C / 45 %, clock at 2025-12-06 12:12:00.
    pub fn new() -> Self {
        FakeBus(Rc::new(RefCell::new(BusState {
            present: vec![SHT31, DS3231],
            sample: (21.5, 45.0),
            corrupt_crc: false,
            clock: [0x00, 0x12, 0x12, 0x06, 0x06, 0x12, 0x25],
            writes: Vec::new(),
        })))
    }

    pub fn set_sample(&self, temperature_c: f32, humidity_percent: f32) {
        self.0.borrow_mut().sample = (temperature_c, humidity_percent);
    }

    pub fn corrupt_sensor_crc(&self, corrupt: bool) {
        self.0.borrow_mut().corrupt_crc = corrupt;
    }

    pub fn set_clock_registers(&self, regs: [u8; 7]) {
        self.0.borrow_mut().clock = regs;
    }

    /// Stop answering at `address`.
    pub fn remove(&self, address: u8) {
        self.0.borrow_mut().present.retain(|a| *a != address);
    }

    /// Start answering at `address` again.
    pub fn insert(&self, address: u8) {
        self.0.borrow_mut().present.push(address);
    }

    /// Bytes written to `address`, one entry per transaction.
    pub fn writes_to(&self, address: u8) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    fn start(&self, address: u8) -> Result<(), MockError> {
        if !self.0.borrow().present.contains(&address) {
            return Err(MockError::Nack);
        }
        Ok(())
    }
}

impl BusState {
    fn sensor_words(&self) -> [u8; 6] {
        let (t, rh) = self.sample;
        let t_raw = (((t + 45.0) / 175.0) * 65535.0).round() as u16;
        let rh_raw = ((rh / 100.0) * 65535.0).round() as u16;
        let mut out = [0u8; 6];
        out[0..2].copy_from_slice(&t_raw.to_be_bytes());
        out[2] = crc8(&out[0..2]);
        out[3..5].copy_from_slice(&rh_raw.to_be_bytes());
        out[5] = crc8(&out[3..5]);
        if self.corrupt_crc {
            out[2] ^= 0xFF;
            out[5] ^= 0xFF;
        }
        out
    }
}

impl i2c::Write for FakeBus {
    type Error = MockError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), MockError> {
        self.start(address)?;
        let mut state = self.0.borrow_mut();
        state.writes.push((address, bytes.to_vec()));
        if address == DS3231 && bytes.len() == 8 && bytes[0] == 0x00 {
            state.clock.copy_from_slice(&bytes[1..8]);
        }
        Ok(())
    }
}

impl i2c::Read for FakeBus {
    type Error = MockError;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), MockError> {
        self.start(address)?;
        let state = self.0.borrow();
        if address == SHT31 {
            let words = state.sensor_words();
            for (b, w) in buffer.iter_mut().zip(words.iter()) {
                *b = *w;
            }
        }
        Ok(())
    }
}

impl i2c::WriteRead for FakeBus {
    type Error = MockError;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), MockError> {
        self.start(address)?;
        let mut state = self.0.borrow_mut();
        state.writes.push((address, bytes.to_vec()));
        match (address, bytes) {
            (SHT31, [0xF3, 0x2D]) => {
                let status = [0x80, 0x10];
                let reply = [status[0], status[1], crc8(&status)];
                for (b, r) in buffer.iter_mut().zip(reply.iter()) {
                    *b = *r;
                }
            }
            (DS3231, [0x00]) => {
                for (b, r) in buffer.iter_mut().zip(state.clock.iter()) {
                    *b = *r;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

// ****************************************************************************
//
// Display
//
// ****************************************************************************

type Frame = Vec<(String, i32)>;

#[derive(Default)]
struct SurfaceState {
    drawing: Frame,
    frames: Vec<Frame>,
    failing: bool,
}

/// Keeps every presented frame as a list of (text, y) lines.
#[derive(Clone, Default)]
pub struct RecordingSurface(Rc<RefCell<SurfaceState>>);

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.0.borrow().frames.clone()
    }

    pub fn last_frame(&self) -> Frame {
        self.0.borrow().frames.last().cloned().unwrap_or_default()
    }

    fn check(&self) -> Result<(), MockError> {
        if self.0.borrow().failing {
            Err(MockError::Injected)
        } else {
            Ok(())
        }
    }
}

impl DrawingSurface for RecordingSurface {
    type Error = MockError;

    fn clear(&mut self) -> Result<(), MockError> {
        self.check()?;
        self.0.borrow_mut().drawing.clear();
        Ok(())
    }

    fn draw_text(&mut self, text: &str, _x: i32, y: i32) -> Result<(), MockError> {
        self.check()?;
        self.0.borrow_mut().drawing.push((text.to_string(), y));
        Ok(())
    }

    fn present(&mut self) -> Result<(), MockError> {
        self.check()?;
        let mut state = self.0.borrow_mut();
        let frame = std::mem::take(&mut state.drawing);
        state.frames.push(frame);
        Ok(())
    }
}

// ****************************************************************************
//
// Filesystem
//
// ****************************************************************************

#[derive(Default)]
struct FsState {
    files: BTreeMap<String, Vec<u8>>,
    open: usize,
    fail_mount: bool,
    fail_writes: bool,
}

/// A flat in-memory filesystem. Mounting needs a device that reports a
/// non-zero size.
pub struct MemVolume<D = MemoryBlockDevice<'static>> {
    state: Rc<RefCell<FsState>>,
    device: Option<D>,
}

/// An open file on a [`MemVolume`].
#[derive(Debug)]
pub struct MemFile {
    path: String,
}

impl<D> MemVolume<D> {
    pub fn new() -> Self {
        MemVolume {
            state: Rc::new(RefCell::new(FsState::default())),
            device: None,
        }
    }

    pub fn fail_mount(&self, fail: bool) {
        self.state.borrow_mut().fail_mount = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.state
            .borrow()
            .files
            .get(path)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    pub fn open_files(&self) -> usize {
        self.state.borrow().open
    }
}

/// Clones share the files but not the mounted device.
impl<D> Clone for MemVolume<D> {
    fn clone(&self) -> Self {
        MemVolume {
            state: self.state.clone(),
            device: None,
        }
    }
}

impl<D> Volume for MemVolume<D>
where
    D: BlockDevice,
{
    type Device = D;
    type Error = MockError;
    type File = MemFile;

    fn mount(&mut self, mut device: D, _mount_point: &str) -> Result<(), MockError> {
        if self.state.borrow().fail_mount || device.block_count().0 == 0 {
            return Err(MockError::Injected);
        }
        self.device = Some(device);
        Ok(())
    }

    fn create(&mut self, path: &str) -> Result<MemFile, MockError> {
        let mut state = self.state.borrow_mut();
        state.files.insert(path.to_string(), Vec::new());
        state.open += 1;
        Ok(MemFile {
            path: path.to_string(),
        })
    }

    fn open_append(&mut self, path: &str) -> Result<MemFile, MockError> {
        let mut state = self.state.borrow_mut();
        if !state.files.contains_key(path) {
            return Err(MockError::Nack);
        }
        state.open += 1;
        Ok(MemFile {
            path: path.to_string(),
        })
    }

    fn write(&mut self, file: &mut MemFile, data: &[u8]) -> Result<(), MockError> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(MockError::Injected);
        }
        state
            .files
            .get_mut(&file.path)
            .ok_or(MockError::Nack)?
            .extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self, _file: &mut MemFile) -> Result<(), MockError> {
        if self.state.borrow().fail_writes {
            return Err(MockError::Injected);
        }
        Ok(())
    }

    fn close(&mut self, _file: MemFile) -> Result<(), MockError> {
        self.state.borrow_mut().open -= 1;
        Ok(())
    }
}

// ****************************************************************************
//
// SD card on an SPI bus
//
// ****************************************************************************

/// Which family of card to pretend to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    /// Version 1: rejects CMD8, byte addressed.
    Sd1,
    /// Version 2 standard capacity: byte addressed.
    Sd2,
    /// High capacity: block addressed.
    Sdhc,
}

const CSD_V1: [u8; 16] = hex!("00 26 00 32 5F 5A 83 AE FE FB CF FF 92 80 40 DF");
const CSD_V2: [u8; 16] = hex!("40 0E 00 32 5B 59 00 00 ED C8 7F 80 0A 40 40 C3");

enum Phase {
    Command,
    ReadMulti { next: u32 },
    WriteSingle { block: u32 },
    WriteMulti { block: u32 },
    Receiving { block: u32, multi: bool, data: Vec<u8> },
}

struct CardState {
    kind: CardKind,
    present: bool,
    /// ACMD41 answers ready on this attempt; never if `None`.
    ready_after: Option<u32>,
    acmd41_count: u32,
    ready: bool,
    reject_writes: bool,
    fail_csd: bool,
    corrupt_read_crc: bool,
    /// Commands answered with an illegal-command status.
    refused: Vec<u8>,
    /// Stop sending block data once this many blocks have gone out.
    withhold_after: Option<u32>,
    blocks_sent: u32,
    data_token: u8,
    /// Stay busy for good after the next accepted block.
    hold_busy: bool,
    busy: bool,
    stop_tokens: u32,
    selected: bool,
    app_cmd: bool,
    frame: Vec<u8>,
    outgoing: VecDeque<u8>,
    phase: Phase,
    blocks: HashMap<u32, [u8; 512]>,
    commands: Vec<(u8, u32)>,
    frames: Vec<[u8; 6]>,
    frequencies: Vec<u32>,
    write_crcs: Vec<u16>,
}

/// A simulated SD card. `spi()` and `cs()` give the two halves of the bus
/// to hand to the driver.
#[derive(Clone)]
pub struct SimCard(Rc<RefCell<CardState>>);

pub struct FakeSpi(Rc<RefCell<CardState>>);

pub struct FakeCs(Rc<RefCell<CardState>>);

impl SimCard {
    /// A card that is ready on its third ACMD41.
    pub fn new(kind: CardKind) -> Self {
        SimCard(Rc::new(RefCell::new(CardState {
            kind,
            present: true,
            ready_after: Some(3),
            acmd41_count: 0,
            ready: false,
            reject_writes: false,
            fail_csd: false,
            corrupt_read_crc: false,
            refused: Vec::new(),
            withhold_after: None,
            blocks_sent: 0,
            data_token: 0xFE,
            hold_busy: false,
            busy: false,
            stop_tokens: 0,
            selected: false,
            app_cmd: false,
            frame: Vec::new(),
            outgoing: VecDeque::new(),
            phase: Phase::Command,
            blocks: HashMap::new(),
            commands: Vec::new(),
            frames: Vec::new(),
            frequencies: Vec::new(),
            write_crcs: Vec::new(),
        })))
    }

    /// No card in the slot: the data line floats high.
    pub fn absent() -> Self {
        let card = Self::new(CardKind::Sdhc);
        card.0.borrow_mut().present = false;
        card
    }

    pub fn spi(&self) -> FakeSpi {
        FakeSpi(self.0.clone())
    }

    pub fn cs(&self) -> FakeCs {
        FakeCs(self.0.clone())
    }

    pub fn ready_after(&self, attempts: Option<u32>) {
        self.0.borrow_mut().ready_after = attempts;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.0.borrow_mut().reject_writes = reject;
    }

    pub fn fail_csd(&self, fail: bool) {
        self.0.borrow_mut().fail_csd = fail;
    }

    pub fn corrupt_read_crc(&self, corrupt: bool) {
        self.0.borrow_mut().corrupt_read_crc = corrupt;
    }

    /// Answer `cmd` with an illegal-command status from now on.
    pub fn refuse(&self, cmd: u8) {
        self.0.borrow_mut().refused.push(cmd);
    }

    /// Leave the data line idle once `blocks` more blocks have been read.
    pub fn withhold_data_after(&self, blocks: Option<u32>) {
        let mut card = self.0.borrow_mut();
        card.blocks_sent = 0;
        card.withhold_after = blocks;
    }

    /// Start block data with `token` instead of 0xFE.
    pub fn data_token(&self, token: u8) {
        self.0.borrow_mut().data_token = token;
    }

    /// Keep the data line low after the next accepted block.
    pub fn hold_busy(&self, hold: bool) {
        let mut card = self.0.borrow_mut();
        card.hold_busy = hold;
        card.busy = card.busy && hold;
    }

    /// How many multi-block stop tokens arrived.
    pub fn stop_tokens(&self) -> u32 {
        self.0.borrow().stop_tokens
    }

    /// Every (command, argument) the card saw.
    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.0.borrow().commands.clone()
    }

    /// Every raw command frame, CRC included.
    pub fn frames(&self) -> Vec<[u8; 6]> {
        self.0.borrow().frames.clone()
    }

    /// Every bus frequency the driver asked for.
    pub fn frequencies(&self) -> Vec<u32> {
        self.0.borrow().frequencies.clone()
    }

    /// The CRC field of every data block written.
    pub fn write_crcs(&self) -> Vec<u16> {
        self.0.borrow().write_crcs.clone()
    }

    pub fn block(&self, idx: u32) -> [u8; 512] {
        self.0
            .borrow()
            .blocks
            .get(&idx)
            .cloned()
            .unwrap_or([0u8; 512])
    }

    pub fn set_block(&self, idx: u32, contents: [u8; 512]) {
        self.0.borrow_mut().blocks.insert(idx, contents);
    }

    pub fn is_selected(&self) -> bool {
        self.0.borrow().selected
    }
}

impl CardState {
    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.present || !self.selected {
            return 0xFF;
        }
        if self.outgoing.is_empty() {
            if self.busy {
                return 0x00;
            }
            if let Phase::ReadMulti { next } = self.phase {
                self.queue_block(next);
                self.phase = Phase::ReadMulti { next: next + 1 };
            }
        }
        let out = self.outgoing.pop_front().unwrap_or(0xFF);
        self.absorb(byte);
        out
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.outgoing.clear();
        self.frame.clear();
        self.phase = Phase::Command;
    }

    fn absorb(&mut self, byte: u8) {
        match std::mem::replace(&mut self.phase, Phase::Command) {
            Phase::Command => self.absorb_command_byte(byte),
            Phase::ReadMulti { next } => {
                self.phase = Phase::ReadMulti { next };
                self.absorb_command_byte(byte);
            }
            Phase::WriteSingle { block } => {
                self.phase = if byte == 0xFE {
                    Phase::Receiving {
                        block,
                        multi: false,
                        data: Vec::new(),
                    }
                } else {
                    Phase::WriteSingle { block }
                };
            }
            Phase::WriteMulti { block } => {
                self.phase = match byte {
                    0xFC => Phase::Receiving {
                        block,
                        multi: true,
                        data: Vec::new(),
                    },
                    0xFD => {
                        self.stop_tokens += 1;
                        // stuff byte, then busy for a couple of clocks
                        self.outgoing.extend([0xFF, 0x00, 0x00].iter());
                        Phase::Command
                    }
                    _ => Phase::WriteMulti { block },
                };
            }
            Phase::Receiving {
                block,
                multi,
                mut data,
            } => {
                data.push(byte);
                if data.len() < 514 {
                    self.phase = Phase::Receiving { block, multi, data };
                    return;
                }
                self.write_crcs
                    .push(u16::from_be_bytes([data[512], data[513]]));
                if self.reject_writes {
                    self.outgoing.extend([0xED, 0x00].iter());
                } else {
                    let mut contents = [0u8; 512];
                    contents.copy_from_slice(&data[..512]);
                    self.blocks.insert(block, contents);
                    if self.hold_busy {
                        self.outgoing.push_back(0xE5);
                        self.busy = true;
                    } else {
                        self.outgoing.extend([0xE5, 0x00, 0x00].iter());
                    }
                }
                self.phase = if multi {
                    Phase::WriteMulti { block: block + 1 }
                } else {
                    Phase::Command
                };
            }
        }
    }

    fn absorb_command_byte(&mut self, byte: u8) {
        if self.frame.is_empty() && (byte & 0xC0) != 0x40 {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let mut frame = [0u8; 6];
            frame.copy_from_slice(&self.frame);
            self.frame.clear();
            self.frames.push(frame);
            let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
            self.command(frame[0] & 0x3F, arg);
        }
    }

    fn idle_bit(&self) -> u8 {
        if self.ready {
            0x00
        } else {
            0x01
        }
    }

    fn block_addressed(&self) -> bool {
        self.kind == CardKind::Sdhc
    }

    /// Turn a command argument into a block number.
    fn block_of(&self, arg: u32) -> Option<u32> {
        if self.block_addressed() {
            Some(arg)
        } else if arg % 512 == 0 {
            Some(arg / 512)
        } else {
            None
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        // one byte of NCR before the answer
        self.outgoing.push_back(0xFF);
        self.outgoing.extend(bytes.iter());
    }

    fn queue_data(&mut self, data: &[u8]) {
        let mut crc = crc16(data);
        if self.corrupt_read_crc {
            crc ^= 0xFFFF;
        }
        self.outgoing.push_back(0xFF);
        self.outgoing.push_back(self.data_token);
        self.outgoing.extend(data.iter());
        self.outgoing.extend(crc.to_be_bytes().iter());
    }

    fn queue_block(&mut self, idx: u32) {
        if let Some(limit) = self.withhold_after {
            if self.blocks_sent >= limit {
                return;
            }
        }
        self.blocks_sent += 1;
        let data = self.blocks.get(&idx).cloned().unwrap_or([0u8; 512]);
        self.queue_data(&data);
    }

    fn command(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        let app = std::mem::replace(&mut self.app_cmd, false);
        if self.refused.contains(&cmd) {
            self.respond(&[0x04]);
            return;
        }
        match (app, cmd) {
            (_, 0) => {
                self.ready = false;
                self.acmd41_count = 0;
                self.respond(&[0x01]);
            }
            (_, 8) => {
                if self.kind == CardKind::Sd1 {
                    self.respond(&[0x05]);
                } else {
                    let echo = arg.to_be_bytes();
                    self.respond(&[0x01, echo[0], echo[1], echo[2], echo[3]]);
                }
            }
            (_, 55) => {
                self.app_cmd = true;
                let r1 = self.idle_bit();
                self.respond(&[r1]);
            }
            (true, 41) => {
                self.acmd41_count += 1;
                if let Some(n) = self.ready_after {
                    if self.acmd41_count >= n {
                        self.ready = true;
                    }
                }
                let r1 = self.idle_bit();
                self.respond(&[r1]);
            }
            (_, 58) => {
                let ocr0 = if self.block_addressed() { 0xC0 } else { 0x80 };
                let r1 = self.idle_bit();
                self.respond(&[r1, ocr0, 0xFF, 0x80, 0x00]);
            }
            (_, 16) => {
                let r1 = if arg == 512 { 0x00 } else { 0x40 };
                self.respond(&[r1]);
            }
            (_, 9) => {
                if self.fail_csd {
                    self.respond(&[0x04]);
                } else {
                    self.respond(&[0x00]);
                    let csd = if self.block_addressed() { CSD_V2 } else { CSD_V1 };
                    self.queue_data(&csd);
                }
            }
            (_, 12) => {
                // the stuff byte, then R1
                self.respond(&[0x00]);
            }
            (_, 17) => match self.block_of(arg) {
                Some(idx) => {
                    self.respond(&[0x00]);
                    self.queue_block(idx);
                }
                None => self.respond(&[0x40]),
            },
            (_, 18) => match self.block_of(arg) {
                Some(idx) => {
                    self.respond(&[0x00]);
                    self.phase = Phase::ReadMulti { next: idx };
                }
                None => self.respond(&[0x40]),
            },
            (_, 24) => match self.block_of(arg) {
                Some(block) => {
                    self.respond(&[0x00]);
                    self.phase = Phase::WriteSingle { block };
                }
                None => self.respond(&[0x40]),
            },
            (_, 25) => match self.block_of(arg) {
                Some(block) => {
                    self.respond(&[0x00]);
                    self.phase = Phase::WriteMulti { block };
                }
                None => self.respond(&[0x40]),
            },
            _ => self.respond(&[0x04]),
        }
    }
}

impl Transfer<u8> for FakeSpi {
    type Error = MockError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], MockError> {
        let mut card = self.0.borrow_mut();
        for word in words.iter_mut() {
            *word = card.exchange(*word);
        }
        Ok(words)
    }
}

impl SpiClock for FakeSpi {
    fn set_frequency(&mut self, hz: u32) {
        self.0.borrow_mut().frequencies.push(hz);
    }
}

impl OutputPin for FakeCs {
    type Error = MockError;

    fn set_low(&mut self) -> Result<(), MockError> {
        self.0.borrow_mut().selected = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), MockError> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

/// A block whose every byte is `fill`, with its index in the first four.
pub fn pattern_block(idx: u32, fill: u8) -> Block {
    let mut block = Block::new();
    for b in block.contents.iter_mut() {
        *b = fill;
    }
    block.contents[0..4].copy_from_slice(&idx.to_be_bytes());
    block
}

/// The CRC7 byte a command frame should end with.
pub fn frame_crc(frame: &[u8; 6]) -> u8 {
    crc7(&frame[0..5])
}
