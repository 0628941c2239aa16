//! Scheduler de tâches SSDP temporisées.
//!
//! Le scheduler tient une collection ordonnée de tâches, ponctuelles ou
//! répétitives, et les déclenche lors des passes `execute` de la boucle
//! coopérative. Les tâches sont une union étiquetée : pas de dispatch
//! dynamique ni de pointeurs hétérogènes dans la file.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ssdp::{self, Announcement};
use crate::transport::UdpEndpoint;

/// Charge utile spécifique à chaque sorte de tâche.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// M-SEARCH multicast répété pendant la fenêtre de découverte.
    MSearch { target: String, mx: u32 },

    /// Réponse unicast à un M-SEARCH reçu.
    MSearchReply {
        to: SocketAddr,
        st: String,
        usn: String,
    },

    /// Jeu complet d'annonces ssdp:alive.
    NotifyAlive,

    /// Jeu complet d'annonces ssdp:byebye.
    NotifyByebye,
}

/// Tâche temporisée.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub due_at: Instant,
    pub end_at: Option<Instant>,
    pub repeat_every: Option<Duration>,
    pub active: bool,
    pub kind: TaskKind,
}

impl ScheduledTask {
    /// Tâche ponctuelle.
    pub fn one_shot(name: &'static str, due_at: Instant, kind: TaskKind) -> Self {
        Self {
            name,
            due_at,
            end_at: None,
            repeat_every: None,
            active: true,
            kind,
        }
    }

    /// Tâche répétitive, avec date de fin optionnelle.
    pub fn repeating(
        name: &'static str,
        due_at: Instant,
        every: Duration,
        end_at: Option<Instant>,
        kind: TaskKind,
    ) -> Self {
        Self {
            name,
            due_at,
            end_at,
            repeat_every: Some(every),
            active: true,
            kind,
        }
    }

    fn process(
        &self,
        udp: &mut dyn UdpEndpoint,
        announcement: Option<&Announcement>,
        ssdp_port: u16,
    ) {
        match &self.kind {
            TaskKind::MSearch { target, mx } => {
                let datagram = ssdp::format_msearch(target, *mx, ssdp_port);
                match udp.send_multicast(datagram.as_bytes()) {
                    Ok(()) => debug!("📤 M-SEARCH sent (ST={}, MX={})", target, mx),
                    Err(e) => warn!("❌ Failed to send M-SEARCH: {}", e),
                }
            }
            TaskKind::MSearchReply { to, st, usn } => {
                let Some(announcement) = announcement else {
                    warn!("M-SEARCH reply scheduled without announcement context");
                    return;
                };
                let datagram = ssdp::format_search_reply(st, usn, announcement);
                match udp.send_unicast(datagram.as_bytes(), *to) {
                    Ok(()) => debug!("📡 M-SEARCH response sent to {} (ST={})", to, st),
                    Err(e) => warn!("❌ Failed to send M-SEARCH response to {}: {}", to, e),
                }
            }
            TaskKind::NotifyAlive => {
                let Some(announcement) = announcement else {
                    warn!("NOTIFY alive scheduled without announcement context");
                    return;
                };
                for scope in &announcement.scopes {
                    let datagram = ssdp::format_alive(scope, announcement, ssdp_port);
                    match udp.send_multicast(datagram.as_bytes()) {
                        Ok(()) => debug!("✅ NOTIFY alive: {} (NT={})", scope.usn, scope.nt),
                        Err(e) => {
                            warn!("❌ Failed to send NOTIFY alive for {}: {}", scope.usn, e)
                        }
                    }
                }
            }
            TaskKind::NotifyByebye => {
                let Some(announcement) = announcement else {
                    warn!("NOTIFY byebye scheduled without announcement context");
                    return;
                };
                for scope in &announcement.scopes {
                    let datagram = ssdp::format_byebye(scope, ssdp_port);
                    match udp.send_multicast(datagram.as_bytes()) {
                        Ok(()) => debug!("👋 NOTIFY byebye: {} (NT={})", scope.usn, scope.nt),
                        Err(e) => {
                            warn!("❌ Failed to send NOTIFY byebye for {}: {}", scope.usn, e)
                        }
                    }
                }
            }
        }
    }
}

/// File ordonnée de tâches temporisées.
///
/// `execute` parcourt la file une fois dans l'ordre d'insertion, déclenche
/// les tâches échues, replanifie les répétitives et balaie ensuite toutes
/// les tâches inactives. Aucun appel concurrent n'est permis.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    active: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            active: true,
        }
    }

    /// Ajoute une tâche, effective immédiatement.
    pub fn add(&mut self, task: ScheduledTask) {
        debug!("Scheduler: task '{}' added", task.name);
        self.tasks.push(task);
    }

    /// Une passe d'exécution : déclenche les tâches échues.
    ///
    /// Une tâche dont `end_at` est atteint devient inactive sans être
    /// déclenchée. Une tâche répétitive voit son échéance repoussée de son
    /// intervalle ; une ponctuelle devient inactive après déclenchement.
    /// Retourne le nombre de tâches déclenchées.
    pub fn execute(
        &mut self,
        now: Instant,
        udp: &mut dyn UdpEndpoint,
        announcement: Option<&Announcement>,
        ssdp_port: u16,
    ) -> usize {
        if !self.active {
            return 0;
        }

        let mut fired = 0;
        for task in &mut self.tasks {
            if !task.active {
                continue;
            }
            if let Some(end_at) = task.end_at {
                if end_at <= now {
                    task.active = false;
                    continue;
                }
            }
            if task.due_at > now {
                continue;
            }

            task.process(udp, announcement, ssdp_port);
            fired += 1;

            match task.repeat_every {
                Some(every) => task.due_at = now + every,
                None => task.active = false,
            }
        }

        self.tasks.retain(|task| task.active);
        fired
    }

    /// Suspend ou reprend les déclenchements sans toucher aux tâches.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Vrai si un M-SEARCH est encore planifié.
    pub fn has_active_msearch(&self) -> bool {
        self.tasks
            .iter()
            .any(|task| task.active && matches!(task.kind, TaskKind::MSearch { .. }))
    }

    /// Prochaine échéance parmi les tâches actives.
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|task| task.active)
            .map(|task| task.due_at)
            .min()
    }
}
