//! Process bootstrap: dual-stack listener setup, fd-limit arithmetic,
//! daemonisation, privilege drop, and pidfile handling.

use std::io::Write as _;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::unistd::{Gid, Uid};
use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

use crate::Result;

/// Descriptors reserved for the reactor, listeners, log file, standard
/// streams (when not daemonised), and padding. Matches the reference's fixed
/// budget of 13.
const RESERVED_FDS: u64 = 13;

/// Soft/hard `RLIMIT_NOFILE` values, and the client limit derived from them.
#[derive(Debug, Clone, Copy)]
pub struct RlimitBudget {
    pub soft: u64,
    pub hard: u64,
    pub implicit_client_limit: usize,
}

/// Query the process's file-descriptor soft/hard limits and compute the
/// implicit client limit after reserving [`RESERVED_FDS`].
///
/// If `requested_limit` exceeds the implicit limit, attempt to raise the
/// soft limit to accommodate it. Failure to raise is fatal, matching the
/// reference's "cannot serve the requested capacity" policy.
pub fn compute_rlimit_budget(requested_limit: usize) -> Result<RlimitBudget> {
    let (mut soft, hard) = rlimit::getrlimit(rlimit::Resource::NOFILE)?;

    let implicit = (soft.saturating_sub(RESERVED_FDS)) as usize;

    if requested_limit > 0 {
        let needed = requested_limit as u64 + RESERVED_FDS;
        if needed > soft {
            if needed > hard {
                return Err(format!(
                    "--client-limit={requested_limit} would need {needed} file descriptors, \
                     exceeding the hard rlimit of {hard}"
                )
                .into());
            }
            rlimit::setrlimit(rlimit::Resource::NOFILE, needed, hard)?;
            soft = needed;
            info!(new_soft = soft, "raised RLIMIT_NOFILE to satisfy --client-limit");
        }
    }

    let implicit_client_limit = if requested_limit > 0 {
        requested_limit
    } else {
        implicit
    };

    Ok(RlimitBudget { soft, hard, implicit_client_limit })
}

/// Bind one `TcpListener` per address family for `port`, marking the IPv6
/// socket `IPV6_V6ONLY` so both bindings coexist independently.
pub async fn bind_dual_stack(port: u16) -> Result<Vec<TcpListener>> {
    let v4_addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let v6_addr: SocketAddr = (std::net::Ipv6Addr::UNSPECIFIED, port).into();

    let mut listeners = Vec::with_capacity(2);

    let v6_socket = TcpSocket::new_v6()?;
    set_v6_only(&v6_socket)?;
    v6_socket.set_reuseaddr(true)?;
    v6_socket.bind(v6_addr)?;
    listeners.push(v6_socket.listen(1024)?);

    let v4_socket = TcpSocket::new_v4()?;
    v4_socket.set_reuseaddr(true)?;
    v4_socket.bind(v4_addr)?;
    listeners.push(v4_socket.listen(1024)?);

    Ok(listeners)
}

fn set_v6_only(socket: &TcpSocket) -> Result<()> {
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: `fd` is owned by `socket` for the duration of this call, and
    // `optval`/its length match IPV6_V6ONLY's expected `c_int` layout.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            std::ptr::addr_of!(optval).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Enable TCP keep-alive on an accepted peer socket (`optval = 1`).
pub fn enable_keepalive(stream: &tokio::net::TcpStream) -> Result<()> {
    let fd = stream.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: `fd` is a valid, open socket for the duration of this call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            std::ptr::addr_of!(optval).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Fork into the background: `setsid`, `chdir("/")`, redirect the standard
/// streams to `/dev/null`, and have the parent write `pidfile` (if given)
/// before exiting 0. Only the child returns from this function.
pub fn daemonize(pidfile: Option<&Path>) -> Result<()> {
    use nix::unistd::ForkResult;

    // SAFETY: called once, early in `main`, before any additional threads
    // or tokio runtime have been started.
    match unsafe { nix::unistd::fork() }? {
        ForkResult::Parent { child } => {
            if let Some(path) = pidfile {
                write_pidfile(path, child.as_raw() as u32)?;
            }
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    nix::unistd::setsid()?;
    std::env::set_current_dir("/")?;
    redirect_standard_streams_to_dev_null()?;

    Ok(())
}

fn redirect_standard_streams_to_dev_null() -> Result<()> {
    let dev_null = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let null_fd = dev_null.as_raw_fd();

    for target_fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: `null_fd` stays open for the duration of this loop via `dev_null`.
        let rc = unsafe { libc::dup2(null_fd, target_fd) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    Ok(())
}

fn write_pidfile(path: &Path, pid: u32) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{pid}")?;
    Ok(())
}

/// Apply `--run-as=USER[:GROUP]`, group first then user, matching the
/// reference's ordering.
pub fn drop_privileges(user: &str, group: Option<&str>) -> Result<()> {
    if let Some(group_name) = group {
        let gid = lookup_gid(group_name)?;
        nix::unistd::setgid(gid)?;
        info!(group = group_name, "dropped group privileges");
    }

    let uid = lookup_uid(user)?;
    nix::unistd::setuid(uid)?;
    info!(user, "dropped user privileges");

    Ok(())
}

fn lookup_uid(name: &str) -> Result<Uid> {
    if let Ok(numeric) = name.parse::<u32>() {
        return Ok(Uid::from_raw(numeric));
    }
    nix::unistd::User::from_name(name)?
        .map(|u| u.uid)
        .ok_or_else(|| format!("no such user: {name}").into())
}

fn lookup_gid(name: &str) -> Result<Gid> {
    if let Ok(numeric) = name.parse::<u32>() {
        return Ok(Gid::from_raw(numeric));
    }
    nix::unistd::Group::from_name(name)?
        .map(|g| g.gid)
        .ok_or_else(|| format!("no such group: {name}").into())
}

