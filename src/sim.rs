//! In-memory Opal drive.
//!
//! Models just enough of a self-encrypting drive (owner secret, Locking SP,
//! users, ranges, PSID) to exercise every operation without hardware. Every
//! control call is recorded, and failures can be queued per call type.

use crate::device::{Drive, OpalControl};
use crate::ioctl::*;
use crate::status::{Status, OPAL_STATUS_INVALID_PARAMETER};
use nix::errno::Errno;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which control call was issued.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ControlOp {
    TakeOwnership,
    ActivateLsp,
    SetPassword,
    ActivateUser,
    SetupRange,
    AddUserToRange,
    EraseRange,
    SecureEraseRange,
    PsidRevert,
    LockUnlock,
    SaveForResume,
    GetStatus,
    GetGeometry,
    GetRangeStatus,
}

impl ControlOp {
    /// Calls that address one locking range or its user.
    pub fn is_range_specific(self) -> bool {
        matches!(
            self,
            ControlOp::SetPassword
                | ControlOp::ActivateUser
                | ControlOp::SetupRange
                | ControlOp::AddUserToRange
                | ControlOp::EraseRange
                | ControlOp::SecureEraseRange
                | ControlOp::LockUnlock
                | ControlOp::SaveForResume
                | ControlOp::GetRangeStatus
        )
    }
}

/// One recorded call. Key material is never recorded; fields that do not
/// apply to `op` are zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub op: ControlOp,
    pub who: u32,
    pub lr: u8,
    pub state: u32,
    pub flags: u16,
    pub start: u64,
    pub length: u64,
}

impl Call {
    fn new(op: ControlOp) -> Self {
        Self { op, who: 0, lr: 0, state: 0, flags: 0, start: 0, length: 0 }
    }
}

/// State of one locking range, in native blocks.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RangeSnapshot {
    pub start: u64,
    pub length: u64,
    pub read_lock_enabled: bool,
    pub write_lock_enabled: bool,
    pub state: u32,
    /// How many times the range's data was erased.
    pub erase_count: u32,
}

#[derive(Clone, Default)]
struct User {
    enabled: bool,
    password: Option<Vec<u8>>,
}

#[derive(Clone, Default)]
struct Range {
    snap: RangeSnapshot,
    /// Users that may change the read lock (`OPAL_RO` grant) and the write
    /// lock (`OPAL_RW` grant).
    read_grants: [bool; 10],
    write_grants: [bool; 10],
    saved: Option<(u32, Vec<u8>)>,
}

struct State {
    supported: bool,
    fail_open: bool,
    ignore_locks: bool,
    sid: Option<Vec<u8>>,
    locking_enabled: bool,
    admin1: Option<Vec<u8>>,
    psid: Vec<u8>,
    geometry: opal_geometry,
    rounding: u64,
    users: [User; 10],
    ranges: [Range; OPAL_MAX_LRS],
    injected: Vec<(ControlOp, Status)>,
    calls: Vec<Call>,
}

impl State {
    fn factory() -> Self {
        let mut geometry = opal_geometry::default();
        geometry.logical_block_size = 512;
        geometry.alignment_granularity = 1;
        Self {
            supported: true,
            fail_open: false,
            ignore_locks: false,
            sid: None,
            locking_enabled: false,
            admin1: None,
            psid: SimulatedDrive::DEFAULT_PSID.to_vec(),
            geometry,
            rounding: 0,
            users: Default::default(),
            ranges: Default::default(),
            injected: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn revert(&mut self) {
        self.sid = None;
        self.locking_enabled = false;
        self.admin1 = None;
        self.users = Default::default();
        for r in self.ranges.iter_mut() {
            let erased = r.snap.erase_count + 1;
            *r = Range::default();
            r.snap.erase_count = erased;
        }
    }

    /// Record `call`, then answer with a queued failure or `ENOTTY` if the
    /// drive has no Opal support.
    fn enter(&mut self, call: Call) -> Option<Status> {
        let op = call.op;
        self.calls.push(call);
        if let Some(pos) = self.injected.iter().position(|(o, _)| *o == op) {
            return Some(self.injected.remove(pos).1);
        }
        if !self.supported {
            return Some(Status::from_errno(Errno::ENOTTY));
        }
        None
    }

    fn key(k: &opal_key) -> &[u8] {
        &k.key[..usize::from(k.key_len)]
    }

    fn auth(&self, who: u32, key: &[u8]) -> bool {
        if !self.locking_enabled {
            return false;
        }
        let secret = match who {
            OPAL_ADMIN1 => self.admin1.as_deref(),
            OPAL_USER1..=OPAL_USER9 => {
                let u = &self.users[who as usize];
                if !u.enabled {
                    return false;
                }
                u.password.as_deref()
            }
            _ => None,
        };
        secret == Some(key)
    }

    fn range_mut(&mut self, lr: u8) -> Option<&mut Range> {
        self.ranges.get_mut(usize::from(lr))
    }

    fn round(&self, v: u64) -> u64 {
        if self.rounding > 1 {
            v - v % self.rounding
        } else {
            v
        }
    }
}

fn status(ok: bool) -> Status {
    if ok {
        Status::SUCCESS
    } else {
        Status::NOT_AUTHORIZED
    }
}

/// A simulated self-encrypting drive.
pub struct SimulatedDrive {
    name: String,
    state: Mutex<State>,
}

impl SimulatedDrive {
    /// PSID every simulated drive ships with.
    pub const DEFAULT_PSID: &'static [u8] = b"SIMULATEDPSID0123456789ABCDEFGHI";

    /// A factory fresh drive with 512-byte logical blocks.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(State::factory()) }
    }

    /// A drive whose transport rejects every Opal ioctl.
    pub fn unsupported(name: impl Into<String>) -> Self {
        let drive = Self::new(name);
        drive.state().supported = false;
        drive
    }

    pub fn with_block_size(self, bytes: u32) -> Self {
        self.state().geometry.logical_block_size = bytes;
        self
    }

    /// Report `blocks` as alignment granularity and silently round range
    /// offsets and lengths down to it.
    pub fn with_granularity(self, blocks: u64) -> Self {
        {
            let mut st = self.state();
            st.geometry.alignment_granularity = blocks;
            st.geometry.align = 1;
            st.rounding = blocks;
        }
        self
    }

    pub fn with_psid(self, psid: &[u8]) -> Self {
        self.state().psid = psid.to_vec();
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of type `op` answer `status`.
    pub fn inject(&self, op: ControlOp, status: Status) {
        self.state().injected.push((op, status));
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Acknowledge lock requests without changing the range, like drives
    /// whose ranges come up with locking disabled.
    pub fn ignore_lock_requests(&self, ignore: bool) {
        self.state().ignore_locks = ignore;
    }

    /// Owned by `sid` without the Locking SP activated.
    pub fn force_sid(&self, sid: &[u8]) {
        self.state().sid = Some(sid.to_vec());
    }

    /// Owned and activated with `admin` as SID and Admin1 secret.
    pub fn force_owned(&self, admin: &[u8]) {
        let mut st = self.state();
        st.sid = Some(admin.to_vec());
        st.admin1 = Some(admin.to_vec());
        st.locking_enabled = true;
    }

    /// Enable user `who` with `password` (activates locking if needed).
    pub fn force_user(&self, who: u32, password: &[u8]) {
        let mut st = self.state();
        st.locking_enabled = true;
        st.users[who as usize] = User { enabled: true, password: Some(password.to_vec()) };
    }

    /// Configure range `lr` directly, in native blocks.
    pub fn force_range(&self, lr: u8, start: u64, length: u64, enabled: bool) {
        let mut st = self.state();
        if let Some(r) = st.range_mut(lr) {
            r.snap.start = start;
            r.snap.length = length;
            r.snap.read_lock_enabled = enabled;
            r.snap.write_lock_enabled = enabled;
            r.snap.state = OPAL_RW;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn ops(&self) -> Vec<ControlOp> {
        self.state().calls.iter().map(|c| c.op).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn range(&self, lr: u8) -> RangeSnapshot {
        self.state()
            .ranges
            .get(usize::from(lr))
            .map(|r| r.snap.clone())
            .unwrap_or_default()
    }

    pub fn is_owned(&self) -> bool {
        self.state().sid.is_some()
    }

    pub fn locking_is_enabled(&self) -> bool {
        self.state().locking_enabled
    }
}

impl Drive for SimulatedDrive {
    fn open(&self) -> io::Result<Box<dyn OpalControl + '_>> {
        if self.state().fail_open {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        Ok(Box::new(SimHandle { drive: self }))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

struct SimHandle<'a> {
    drive: &'a SimulatedDrive,
}

impl SimHandle<'_> {
    fn state(&self) -> MutexGuard<'_, State> {
        self.drive.state()
    }
}

fn session_call(op: ControlOp, s: &opal_session_info) -> Call {
    Call { who: s.who, lr: s.opal_key.lr, ..Call::new(op) }
}

fn erase(st: &mut State, s: &opal_session_info, secure: bool) -> Status {
    if s.who != OPAL_ADMIN1 || !st.auth(OPAL_ADMIN1, State::key(&s.opal_key)) {
        return Status::NOT_AUTHORIZED;
    }
    let Some(r) = st.range_mut(s.opal_key.lr) else {
        return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
    };
    r.snap.erase_count += 1;
    r.saved = None;
    if !secure {
        r.snap.start = 0;
        r.snap.length = 0;
        r.snap.read_lock_enabled = false;
        r.snap.write_lock_enabled = false;
        r.snap.state = OPAL_RW;
    }
    Status::SUCCESS
}

impl OpalControl for SimHandle<'_> {
    fn take_ownership(&mut self, key: &opal_key) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(Call::new(ControlOp::TakeOwnership)) {
            return s;
        }
        let key = State::key(key).to_vec();
        match &st.sid {
            None => {
                st.sid = Some(key);
                Status::SUCCESS
            }
            Some(sid) => status(*sid == key),
        }
    }

    fn activate_lsp(&mut self, act: &opal_lr_act) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(Call { state: u32::from(act.num_lrs), ..Call::new(ControlOp::ActivateLsp) }) {
            return s;
        }
        if usize::from(act.num_lrs) > OPAL_MAX_LRS {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        }
        let key = State::key(&act.key).to_vec();
        if st.sid.as_deref() != Some(key.as_slice()) {
            return Status::NOT_AUTHORIZED;
        }
        st.admin1 = Some(key);
        st.locking_enabled = true;
        Status::SUCCESS
    }

    fn set_password(&mut self, pw: &opal_new_pw) -> Status {
        let mut st = self.state();
        let call = Call { who: pw.new_user_pw.who, ..session_call(ControlOp::SetPassword, &pw.session) };
        if let Some(s) = st.enter(call) {
            return s;
        }
        let (who, target) = (pw.session.who, pw.new_user_pw.who);
        let allowed = st.auth(who, State::key(&pw.session.opal_key)) && (who == OPAL_ADMIN1 || who == target);
        if !allowed {
            return Status::NOT_AUTHORIZED;
        }
        let new = State::key(&pw.new_user_pw.opal_key).to_vec();
        match target {
            OPAL_ADMIN1 => st.admin1 = Some(new),
            OPAL_USER1..=OPAL_USER9 => st.users[target as usize].password = Some(new),
            _ => return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER),
        }
        Status::SUCCESS
    }

    fn activate_user(&mut self, session: &opal_session_info) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(session_call(ControlOp::ActivateUser, session)) {
            return s;
        }
        if !st.auth(OPAL_ADMIN1, State::key(&session.opal_key)) {
            return Status::NOT_AUTHORIZED;
        }
        match session.who {
            OPAL_USER1..=OPAL_USER9 => {
                st.users[session.who as usize].enabled = true;
                Status::SUCCESS
            }
            _ => Status::from_raw(OPAL_STATUS_INVALID_PARAMETER),
        }
    }

    fn setup_range(&mut self, setup: &opal_user_lr_setup) -> Status {
        let mut st = self.state();
        let call = Call {
            start: setup.range_start,
            length: setup.range_length,
            ..session_call(ControlOp::SetupRange, &setup.session)
        };
        if let Some(s) = st.enter(call) {
            return s;
        }
        if setup.session.who != OPAL_ADMIN1 || !st.auth(OPAL_ADMIN1, State::key(&setup.session.opal_key)) {
            return Status::NOT_AUTHORIZED;
        }
        let (start, length) = (st.round(setup.range_start), st.round(setup.range_length));
        let Some(r) = st.range_mut(setup.session.opal_key.lr) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };
        r.snap.start = start;
        r.snap.length = length;
        r.snap.read_lock_enabled = setup.RLE != 0;
        r.snap.write_lock_enabled = setup.WLE != 0;
        Status::SUCCESS
    }

    fn add_user_to_range(&mut self, grant: &opal_lock_unlock) -> Status {
        let mut st = self.state();
        let call = Call { state: grant.l_state, ..session_call(ControlOp::AddUserToRange, &grant.session) };
        if let Some(s) = st.enter(call) {
            return s;
        }
        if !st.auth(OPAL_ADMIN1, State::key(&grant.session.opal_key)) {
            return Status::NOT_AUTHORIZED;
        }
        let who = grant.session.who as usize;
        if !(OPAL_USER1..=OPAL_USER9).contains(&grant.session.who) {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        }
        let l_state = grant.l_state;
        let Some(r) = st.range_mut(grant.session.opal_key.lr) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };
        match l_state {
            OPAL_RO => r.read_grants[who] = true,
            OPAL_RW => r.write_grants[who] = true,
            _ => return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER),
        }
        Status::SUCCESS
    }

    fn erase_range(&mut self, session: &opal_session_info) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(session_call(ControlOp::EraseRange, session)) {
            return s;
        }
        erase(&mut st, session, false)
    }

    fn secure_erase_range(&mut self, session: &opal_session_info) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(session_call(ControlOp::SecureEraseRange, session)) {
            return s;
        }
        erase(&mut st, session, true)
    }

    fn psid_revert(&mut self, psid: &opal_key) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(Call::new(ControlOp::PsidRevert)) {
            return s;
        }
        if State::key(psid) != st.psid.as_slice() {
            return Status::NOT_AUTHORIZED;
        }
        st.revert();
        Status::SUCCESS
    }

    fn lock_unlock(&mut self, lu: &opal_lock_unlock) -> Status {
        let mut st = self.state();
        let call = Call { state: lu.l_state, ..session_call(ControlOp::LockUnlock, &lu.session) };
        if let Some(s) = st.enter(call) {
            return s;
        }
        let who = lu.session.who;
        let lr = lu.session.opal_key.lr;
        let Some(state) = LockState::from_raw(lu.l_state) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };
        let Some(range) = st.ranges.get(usize::from(lr)) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };

        let mut key = State::key(&lu.session.opal_key).to_vec();
        if key.is_empty() && state == LockState::Locked {
            match &range.saved {
                Some((saved_who, saved)) if *saved_who == who => key = saved.clone(),
                _ => return Status::NOT_AUTHORIZED,
            }
        }
        if !st.auth(who, &key) {
            return Status::NOT_AUTHORIZED;
        }
        let idx = who as usize;
        if who != OPAL_ADMIN1 && !(range.read_grants[idx] && range.write_grants[idx]) {
            return Status::NOT_AUTHORIZED;
        }
        if st.ignore_locks {
            return Status::SUCCESS;
        }
        if let Some(r) = st.range_mut(lr) {
            r.snap.state = state.raw();
        }
        Status::SUCCESS
    }

    fn save(&mut self, lu: &opal_lock_unlock) -> Status {
        let mut st = self.state();
        let call = Call { state: lu.l_state, flags: lu.flags, ..session_call(ControlOp::SaveForResume, &lu.session) };
        if let Some(s) = st.enter(call) {
            return s;
        }
        let who = lu.session.who;
        let key = State::key(&lu.session.opal_key).to_vec();
        let for_lock = lu.flags & OPAL_SAVE_FOR_LOCK != 0;
        let Some(r) = st.range_mut(lu.session.opal_key.lr) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };
        r.saved = if for_lock { Some((who, key)) } else { None };
        Status::SUCCESS
    }

    fn get_status(&mut self, out: &mut opal_status) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(Call::new(ControlOp::GetStatus)) {
            return s;
        }
        let mut flags = OPAL_FL_SUPPORTED | OPAL_FL_LOCKING_SUPPORTED;
        if st.locking_enabled {
            flags |= OPAL_FL_LOCKING_ENABLED;
        }
        let any_locked = st.ranges.iter().any(|r| {
            r.snap.read_lock_enabled && r.snap.write_lock_enabled && r.snap.state == OPAL_LK
        });
        if any_locked {
            flags |= OPAL_FL_LOCKED;
        }
        out.flags = flags;
        Status::SUCCESS
    }

    fn get_geometry(&mut self, out: &mut opal_geometry) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(Call::new(ControlOp::GetGeometry)) {
            return s;
        }
        *out = st.geometry;
        Status::SUCCESS
    }

    fn get_range_status(&mut self, lrs: &mut opal_lr_status) -> Status {
        let mut st = self.state();
        if let Some(s) = st.enter(session_call(ControlOp::GetRangeStatus, &lrs.session)) {
            return s;
        }
        if !st.auth(lrs.session.who, State::key(&lrs.session.opal_key)) {
            return Status::NOT_AUTHORIZED;
        }
        let Some(r) = st.ranges.get(usize::from(lrs.session.opal_key.lr)) else {
            return Status::from_raw(OPAL_STATUS_INVALID_PARAMETER);
        };
        lrs.range_start = r.snap.start;
        lrs.range_length = r.snap.length;
        lrs.RLE = u32::from(r.snap.read_lock_enabled);
        lrs.WLE = u32::from(r.snap.write_lock_enabled);
        lrs.l_state = if r.snap.state == 0 { OPAL_RW } else { r.snap.state };
        Status::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> opal_key {
        let mut k = opal_key::default();
        k.key_len = bytes.len() as u8;
        k.key[..bytes.len()].copy_from_slice(bytes);
        k
    }

    #[test]
    fn ownership_is_sticky() {
        let drive = SimulatedDrive::new("sim");
        let mut h = drive.open().unwrap();
        assert_eq!(h.take_ownership(&key(b"a")), Status::SUCCESS);
        assert_eq!(h.take_ownership(&key(b"a")), Status::SUCCESS);
        assert_eq!(h.take_ownership(&key(b"b")), Status::NOT_AUTHORIZED);
    }

    #[test]
    fn injected_status_is_consumed_once() {
        let drive = SimulatedDrive::new("sim");
        drive.inject(ControlOp::GetStatus, Status::FAIL);
        let mut h = drive.open().unwrap();
        let mut out = opal_status::default();
        assert_eq!(h.get_status(&mut out), Status::FAIL);
        assert_eq!(h.get_status(&mut out), Status::SUCCESS);
        assert_eq!(drive.ops(), vec![ControlOp::GetStatus, ControlOp::GetStatus]);
    }

    #[test]
    fn psid_revert_wipes_ownership() {
        let drive = SimulatedDrive::new("sim").with_psid(b"label-psid");
        drive.force_owned(b"admin");
        let mut h = drive.open().unwrap();
        assert_eq!(h.psid_revert(&key(b"nope")), Status::NOT_AUTHORIZED);
        assert_eq!(h.psid_revert(&key(b"label-psid")), Status::SUCCESS);
        drop(h);
        assert!(!drive.is_owned());
        assert_eq!(drive.range(1).erase_count, 1);
    }
}
