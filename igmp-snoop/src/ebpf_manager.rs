//! eBPF program lifecycle manager.
//!
//! Loads the compiled XDP object, attaches the downstream monitor to every
//! subscriber-facing interface and the forwarder to the upstream interface,
//! and hands the shared maps to the control loop. Detaches on shutdown.

use anyhow::{Context, Result};
use aya::maps::{DevMapHash, MapData, RingBuf};
use aya::programs::xdp::XdpLinkId;
use aya::programs::Xdp;
use aya::Ebpf;
use tracing::{debug, info, warn};

use crate::config::Config;
use igmp_snoop_common::{MAP_EVENTS, MAP_FORWARDING, PROG_DOWNSTREAM, PROG_UPSTREAM};

// ---------------------------------------------------------------------------
// Public Interface
// ---------------------------------------------------------------------------

struct Attachment {
    program: &'static str,
    interface: String,
    link: XdpLinkId,
}

/// Owns the loaded eBPF object and the XDP attachments made from it.
pub struct EbpfManager {
    bpf: Ebpf,
    attachments: Vec<Attachment>,
}

impl EbpfManager {
    /// Load the eBPF object from its compiled ELF bytes.
    pub fn load(ebpf_bytes: &[u8]) -> Result<Self> {
        let mut bpf = Ebpf::load(ebpf_bytes).context("loading eBPF program")?;

        // Forward eBPF-side debug!() output into tracing
        if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
            warn!("eBPF logging not available: {}", e);
        }

        Ok(Self {
            bpf,
            attachments: Vec::new(),
        })
    }

    /// Attach the monitor to each downstream interface and the forwarder to
    /// the upstream interface.
    pub fn attach(&mut self, config: &Config) -> Result<()> {
        let flags = config.xdp_mode.flags();

        self.load_program(PROG_DOWNSTREAM)?;
        for iface in &config.downstream {
            self.attach_program(PROG_DOWNSTREAM, iface, flags)
                .with_context(|| format!("attaching {} to {}", PROG_DOWNSTREAM, iface))?;
        }

        self.load_program(PROG_UPSTREAM)?;
        self.attach_program(PROG_UPSTREAM, &config.upstream, flags)
            .with_context(|| format!("attaching {} to {}", PROG_UPSTREAM, config.upstream))?;

        Ok(())
    }

    /// Take ownership of the event ring buffer. Can only be done once.
    pub fn take_events(&mut self) -> Result<RingBuf<MapData>> {
        let map = self
            .bpf
            .take_map(MAP_EVENTS)
            .with_context(|| format!("{} map not found", MAP_EVENTS))?;
        RingBuf::try_from(map).with_context(|| format!("{} map type mismatch", MAP_EVENTS))
    }

    /// Take ownership of the forwarding table. Can only be done once.
    pub fn take_forwarding(&mut self) -> Result<DevMapHash<MapData>> {
        let map = self
            .bpf
            .take_map(MAP_FORWARDING)
            .with_context(|| format!("{} map not found", MAP_FORWARDING))?;
        DevMapHash::try_from(map).with_context(|| format!("{} map type mismatch", MAP_FORWARDING))
    }

    /// Detach all XDP programs. Called on shutdown.
    pub fn detach(mut self) -> Result<()> {
        info!("detaching eBPF programs");

        for att in std::mem::take(&mut self.attachments) {
            let result = self
                .xdp_mut(att.program)
                .and_then(|prog| prog.detach(att.link).context("detaching XDP link"));
            if let Err(e) = result {
                warn!(interface = %att.interface, program = att.program, error = %e, "failed to detach");
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private: XDP Attachment
    // -----------------------------------------------------------------------

    fn xdp_mut(&mut self, name: &str) -> Result<&mut Xdp> {
        self.bpf
            .program_mut(name)
            .with_context(|| format!("eBPF program '{}' not found", name))?
            .try_into()
            .context("program type mismatch (expected Xdp)")
    }

    fn load_program(&mut self, name: &str) -> Result<()> {
        self.xdp_mut(name)?
            .load()
            .with_context(|| format!("loading XDP program '{}'", name))?;
        debug!(program = name, "loaded XDP program");
        Ok(())
    }

    fn attach_program(
        &mut self,
        name: &'static str,
        iface: &str,
        flags: aya::programs::XdpFlags,
    ) -> Result<()> {
        let ifindex = interface_index(iface)?;
        let link = self.xdp_mut(name)?.attach(iface, flags)?;

        info!(interface = iface, ifindex, program = name, "attached XDP program");
        self.attachments.push(Attachment {
            program: name,
            interface: iface.to_string(),
            link,
        });

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Get the interface index for a network interface name.
pub fn interface_index(iface: &str) -> Result<u32> {
    let idx = nix::net::if_::if_nametoindex(iface)
        .with_context(|| format!("interface '{}' not found", iface))?;
    Ok(idx)
}

/// Lift RLIMIT_MEMLOCK so map creation does not fail on kernels that still
/// charge BPF memory against it.
pub fn bump_memlock_rlimit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("setting RLIMIT_MEMLOCK");
    }
    Ok(())
}
