use std::mem::{self, MaybeUninit};

use nix::libc;
use nix::unistd::Pid;

use super::{ptrace_checked, PtraceRequest};
use crate::common::state::FP_STATE_SIZE;
use crate::{FpState, RegistersSnapshot, Result};

// The register banks are transferred as whole structs; the requests
// differ only in which argument carries the user-space pointer.
fn transfer(request: PtraceRequest, tid: Pid, bank: *mut libc::c_void) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        ptrace_checked(request, tid, core::ptr::null_mut(), bank).map(drop)
    }
    #[cfg(target_os = "freebsd")]
    {
        ptrace_checked(request, tid, bank, core::ptr::null_mut()).map(drop)
    }
}

fn get_raw_regs(tid: Pid) -> Result<RawRegs> {
    let mut regs = MaybeUninit::<RawRegs>::uninit();

    transfer(PtraceRequest::GetRegs, tid, regs.as_mut_ptr().cast())?;

    Ok(unsafe { regs.assume_init() })
}

fn get_raw_fpregs(tid: Pid) -> Result<FpState> {
    let mut fpregs = MaybeUninit::<RawFpRegs>::uninit();

    transfer(PtraceRequest::GetFpRegs, tid, fpregs.as_mut_ptr().cast())?;

    let mut state = FpState::zeroed();

    unsafe {
        core::ptr::copy_nonoverlapping(
            fpregs.as_ptr().cast::<u8>(),
            state.0.as_mut_ptr(),
            FP_STATE_SIZE,
        );
    }

    Ok(state)
}

/// Copies the full register bank of the given stopped thread.
pub fn get_registers(tid: Pid) -> Result<RegistersSnapshot> {
    let regs = get_raw_regs(tid)?;
    let fpu = get_raw_fpregs(tid)?;

    Ok(snapshot_from_raw(&regs, fpu))
}

/// Writes the full register bank of the given stopped thread.
///
/// The current bank is fetched first so that fields the snapshot does
/// not carry (syscall bookkeeping, trap metadata) survive the write.
pub fn set_registers(tid: Pid, snapshot: &RegistersSnapshot) -> Result<()> {
    let mut regs = get_raw_regs(tid)?;

    raw_from_snapshot(snapshot, &mut regs);

    transfer(
        PtraceRequest::SetRegs,
        tid,
        &mut regs as *mut RawRegs as *mut _,
    )?;

    let mut fpregs = MaybeUninit::<RawFpRegs>::uninit();

    unsafe {
        core::ptr::copy_nonoverlapping(
            snapshot.fpu.0.as_ptr(),
            fpregs.as_mut_ptr().cast::<u8>(),
            FP_STATE_SIZE,
        );
    }

    transfer(PtraceRequest::SetFpRegs, tid, fpregs.as_mut_ptr().cast())
}

#[cfg(target_os = "linux")]
type RawRegs = libc::user_regs_struct;
#[cfg(target_os = "linux")]
type RawFpRegs = libc::user_fpregs_struct;

#[cfg(target_os = "linux")]
const _: () = assert!(mem::size_of::<RawFpRegs>() == FP_STATE_SIZE);

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn snapshot_from_raw(regs: &RawRegs, fpu: FpState) -> RegistersSnapshot {
    RegistersSnapshot {
        rax: regs.rax,
        rbx: regs.rbx,
        rcx: regs.rcx,
        rdx: regs.rdx,
        rsi: regs.rsi,
        rdi: regs.rdi,
        rbp: regs.rbp,
        rsp: regs.rsp,
        r8: regs.r8,
        r9: regs.r9,
        r10: regs.r10,
        r11: regs.r11,
        r12: regs.r12,
        r13: regs.r13,
        r14: regs.r14,
        r15: regs.r15,
        rip: regs.rip,
        rflags: regs.eflags,
        cs: regs.cs as u16,
        ss: regs.ss as u16,
        ds: regs.ds as u16,
        es: regs.es as u16,
        fs: regs.fs as u16,
        gs: regs.gs as u16,
        fs_base: regs.fs_base,
        gs_base: regs.gs_base,
        fpu,
        debug: [0; 8],
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn raw_from_snapshot(snapshot: &RegistersSnapshot, regs: &mut RawRegs) {
    regs.rax = snapshot.rax;
    regs.rbx = snapshot.rbx;
    regs.rcx = snapshot.rcx;
    regs.rdx = snapshot.rdx;
    regs.rsi = snapshot.rsi;
    regs.rdi = snapshot.rdi;
    regs.rbp = snapshot.rbp;
    regs.rsp = snapshot.rsp;
    regs.r8 = snapshot.r8;
    regs.r9 = snapshot.r9;
    regs.r10 = snapshot.r10;
    regs.r11 = snapshot.r11;
    regs.r12 = snapshot.r12;
    regs.r13 = snapshot.r13;
    regs.r14 = snapshot.r14;
    regs.r15 = snapshot.r15;
    regs.rip = snapshot.rip;
    regs.eflags = snapshot.rflags;
    regs.cs = snapshot.cs as u64;
    regs.ss = snapshot.ss as u64;
    regs.ds = snapshot.ds as u64;
    regs.es = snapshot.es as u64;
    regs.fs = snapshot.fs as u64;
    regs.gs = snapshot.gs as u64;
    regs.fs_base = snapshot.fs_base;
    regs.gs_base = snapshot.gs_base;
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
fn snapshot_from_raw(regs: &RawRegs, fpu: FpState) -> RegistersSnapshot {
    RegistersSnapshot {
        eax: regs.eax as u32,
        ebx: regs.ebx as u32,
        ecx: regs.ecx as u32,
        edx: regs.edx as u32,
        esi: regs.esi as u32,
        edi: regs.edi as u32,
        ebp: regs.ebp as u32,
        esp: regs.esp as u32,
        eip: regs.eip as u32,
        eflags: regs.eflags as u32,
        cs: regs.xcs as u16,
        ss: regs.xss as u16,
        ds: regs.xds as u16,
        es: regs.xes as u16,
        fs: regs.xfs as u16,
        gs: regs.xgs as u16,
        // The 32-bit trap frame carries selectors only.
        fs_base: 0,
        gs_base: 0,
        fpu,
        debug: [0; 8],
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
fn raw_from_snapshot(snapshot: &RegistersSnapshot, regs: &mut RawRegs) {
    regs.eax = snapshot.eax as libc::c_long;
    regs.ebx = snapshot.ebx as libc::c_long;
    regs.ecx = snapshot.ecx as libc::c_long;
    regs.edx = snapshot.edx as libc::c_long;
    regs.esi = snapshot.esi as libc::c_long;
    regs.edi = snapshot.edi as libc::c_long;
    regs.ebp = snapshot.ebp as libc::c_long;
    regs.esp = snapshot.esp as libc::c_long;
    regs.eip = snapshot.eip as libc::c_long;
    regs.eflags = snapshot.eflags as libc::c_long;
    regs.xcs = snapshot.cs as libc::c_long;
    regs.xss = snapshot.ss as libc::c_long;
    regs.xds = snapshot.ds as libc::c_long;
    regs.xes = snapshot.es as libc::c_long;
    regs.xfs = snapshot.fs as libc::c_long;
    regs.xgs = snapshot.gs as libc::c_long;
}

#[cfg(target_os = "freebsd")]
#[repr(C)]
#[allow(non_camel_case_types)]
struct RawRegs {
    r_r15: i64,
    r_r14: i64,
    r_r13: i64,
    r_r12: i64,
    r_r11: i64,
    r_r10: i64,
    r_r9: i64,
    r_r8: i64,
    r_rdi: i64,
    r_rsi: i64,
    r_rbp: i64,
    r_rbx: i64,
    r_rdx: i64,
    r_rcx: i64,
    r_rax: i64,
    r_trapno: i64,
    r_fs: u16,
    r_gs: u16,
    r_err: u32,
    r_es: u16,
    r_ds: u16,
    r_rip: i64,
    r_cs: i64,
    r_rflags: i64,
    r_rsp: i64,
    r_ss: i64,
}

#[cfg(target_os = "freebsd")]
#[repr(C, align(16))]
struct RawFpRegs([u8; FP_STATE_SIZE]);

#[cfg(target_os = "freebsd")]
fn snapshot_from_raw(regs: &RawRegs, fpu: FpState) -> RegistersSnapshot {
    RegistersSnapshot {
        rax: regs.r_rax as u64,
        rbx: regs.r_rbx as u64,
        rcx: regs.r_rcx as u64,
        rdx: regs.r_rdx as u64,
        rsi: regs.r_rsi as u64,
        rdi: regs.r_rdi as u64,
        rbp: regs.r_rbp as u64,
        rsp: regs.r_rsp as u64,
        r8: regs.r_r8 as u64,
        r9: regs.r_r9 as u64,
        r10: regs.r_r10 as u64,
        r11: regs.r_r11 as u64,
        r12: regs.r_r12 as u64,
        r13: regs.r_r13 as u64,
        r14: regs.r_r14 as u64,
        r15: regs.r_r15 as u64,
        rip: regs.r_rip as u64,
        rflags: regs.r_rflags as u64,
        cs: regs.r_cs as u16,
        ss: regs.r_ss as u16,
        ds: regs.r_ds,
        es: regs.r_es,
        fs: regs.r_fs,
        gs: regs.r_gs,
        // The trap frame carries selectors only; the bases are not
        // exposed through this request.
        fs_base: 0,
        gs_base: 0,
        fpu,
        debug: [0; 8],
    }
}

#[cfg(target_os = "freebsd")]
fn raw_from_snapshot(snapshot: &RegistersSnapshot, regs: &mut RawRegs) {
    regs.r_rax = snapshot.rax as i64;
    regs.r_rbx = snapshot.rbx as i64;
    regs.r_rcx = snapshot.rcx as i64;
    regs.r_rdx = snapshot.rdx as i64;
    regs.r_rsi = snapshot.rsi as i64;
    regs.r_rdi = snapshot.rdi as i64;
    regs.r_rbp = snapshot.rbp as i64;
    regs.r_rsp = snapshot.rsp as i64;
    regs.r_r8 = snapshot.r8 as i64;
    regs.r_r9 = snapshot.r9 as i64;
    regs.r_r10 = snapshot.r10 as i64;
    regs.r_r11 = snapshot.r11 as i64;
    regs.r_r12 = snapshot.r12 as i64;
    regs.r_r13 = snapshot.r13 as i64;
    regs.r_r14 = snapshot.r14 as i64;
    regs.r_r15 = snapshot.r15 as i64;
    regs.r_rip = snapshot.rip as i64;
    regs.r_rflags = snapshot.rflags as i64;
    regs.r_cs = snapshot.cs as i64;
    regs.r_ss = snapshot.ss as i64;
    regs.r_ds = snapshot.ds;
    regs.r_es = snapshot.es;
    regs.r_fs = snapshot.fs;
    regs.r_gs = snapshot.gs;
}
