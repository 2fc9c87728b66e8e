// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the replicated database
//!
//! The shard is a chain: primary streams to the synchronous replica,
//! which streams to the asynchronous replica.  Peers are upgraded leaf
//! first (async, then sync), each step gated on the shard settling back
//! into the expected replication mode before the next peer is touched.
//! The primary is never upgraded in place: it is disabled, the shard
//! promotes the (already-upgraded) sync peer on its own, and the former
//! primary rejoins as a replica on the new image.  That way the node that
//! ends up accepting writes always discovers an already-upgraded quorum.
//!
//! A single-peer shard can't absorb primary downtime while the service
//! registry requires a writable database, so that branch first coerces
//! the registry into proto mode for the duration of the reprovision.
//!
//! Failure anywhere leaves the shard as-is for operator-driven recovery;
//! no step here retries a previous step.

use async_trait::async_trait;
use serde::Deserialize;
use slog::info;
use std::time::Duration;
use updateadm_clients::RegistryMode;
use updateadm_common::error::{InternalError, UpdateError};
use updateadm_common::poll::{self, CondCheckError, PollError, PollPolicy};
use updateadm_types::{Image, Instance, NormalizedChange, ProcedureKind};
use uuid::Uuid;

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    ensure_image_local, refresh_service_record, save_instance_undo,
    single_change, the_one_zone_of,
};
use crate::procedures::ProcedureExecutor;

/// Replication settling after a peer is disabled or reprovisioned.
const SHARD_SETTLE: PollPolicy =
    PollPolicy::new(Duration::from_secs(5), 180);

/// Promotion of the sync peer after the primary is disabled.
const PROMOTION_SETTLE: PollPolicy =
    PollPolicy::new(Duration::from_secs(5), 36);

/// PostgreSQL accepting queries after a single-peer reprovision.
const POSTGRES_SETTLE: PollPolicy =
    PollPolicy::new(Duration::from_secs(5), 36);

/// Grace period after a reprovision before polling shard state at all.
const REPROVISION_SETTLE: Duration = Duration::from_secs(60);

/// The services that make up one database peer.
const PEER_SERVICES: [&str; 3] =
    ["manatee-sitter", "manatee-snapshotter", "manatee-backupserver"];

/// The observable replication state of the shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ShardMode {
    /// no peers up
    Empty,
    /// only the primary is up, no replication
    Primary,
    /// primary and sync up, primary→sync replication synchronous
    Sync,
    /// full chain up, sync→async replication asynchronous
    Async,
    /// anything else; indeterminate, callers must poll
    Transition,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ReplState {
    #[serde(default)]
    pub sync_state: Option<String>,
}

/// One peer as reported by the shard's status tool.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ShardPeer {
    #[serde(rename = "zoneId")]
    pub zone_id: String,
    pub ip: String,
    /// state of this peer's replication to its downstream
    #[serde(default)]
    pub repl: ReplState,
}

/// Parsed shard status as observed from one peer.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ShardStatus {
    #[serde(default)]
    pub primary: Option<ShardPeer>,
    #[serde(default)]
    pub sync: Option<ShardPeer>,
    #[serde(default, rename = "async")]
    pub r#async: Option<ShardPeer>,
}

impl ShardStatus {
    /// Parse the status tool's JSON: one object keyed by shard name; we
    /// manage the `sdc` shard but accept a single-shard report under any
    /// name.
    pub fn parse(stdout: &str) -> Result<ShardStatus, InternalError> {
        let value: serde_json::Value = serde_json::from_str(stdout)
            .map_err(|source| InternalError::Serialize {
                context: "parsing shard status".to_string(),
                source,
            })?;
        let shard = value
            .get("sdc")
            .cloned()
            .or_else(|| {
                value
                    .as_object()
                    .and_then(|o| o.values().next())
                    .cloned()
            })
            .ok_or_else(|| {
                InternalError::UnexpectedState(
                    "shard status reported no shards".to_string(),
                )
            })?;
        serde_json::from_value(shard).map_err(|source| {
            InternalError::Serialize {
                context: "parsing shard status peers".to_string(),
                source,
            }
        })
    }

    pub fn mode(&self) -> ShardMode {
        let Some(primary) = &self.primary else {
            return ShardMode::Empty;
        };
        let primary_repl = primary.repl.sync_state.as_deref();
        match (&self.sync, &self.r#async) {
            (None, None) => match primary_repl {
                None => ShardMode::Primary,
                Some(_) => ShardMode::Transition,
            },
            (Some(_), None) => match primary_repl {
                Some("sync") => ShardMode::Sync,
                _ => ShardMode::Transition,
            },
            (Some(sync), Some(_)) => {
                if primary_repl == Some("sync")
                    && sync.repl.sync_state.as_deref() == Some("async")
                {
                    ShardMode::Async
                } else {
                    ShardMode::Transition
                }
            }
            (None, Some(_)) => ShardMode::Transition,
        }
    }
}

/// A shard peer resolved against the inventory: its zone plus the server
/// hosting it.
#[derive(Clone, Debug)]
struct Peer {
    role: &'static str,
    zone_id: String,
    server_id: Uuid,
}

impl Peer {
    fn resolve(
        ctx: &ExecContext<'_>,
        role: &'static str,
        reported: &ShardPeer,
    ) -> Result<Peer, ExecError> {
        let instance = ctx
            .inventory
            .instance_by_id(&reported.zone_id)
            .ok_or_else(|| {
                ExecError::Update(UpdateError::HaSetup(format!(
                    "{} peer zone {} is not in the inventory",
                    role, reported.zone_id
                )))
            })?;
        Ok(Peer {
            role,
            zone_id: reported.zone_id.clone(),
            server_id: instance.server_id,
        })
    }
}

pub(super) struct UpdateManatee {
    changes: Vec<NormalizedChange>,
}

impl UpdateManatee {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateManatee { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateManatee {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateManatee
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "manatee")?;
        let peers: Vec<&Instance> =
            ctx.inventory.instances_of("manatee").collect();
        if peers.is_empty() {
            return Err(ExecError::Precondition(
                "no manatee peers in inventory".to_string(),
            ));
        }
        ctx.note(&format!(
            "Updating \"manatee\" ({} peer{}) to image {} ({}@{})",
            peers.len(),
            if peers.len() == 1 { "" } else { "s" },
            image.uuid,
            image.name,
            image.version,
        ));

        self.refresh_user_script(ctx, change, image, &peers).await?;

        if peers.len() == 1 {
            self.update_single_peer(ctx, peers[0], image).await
        } else {
            // Discover roles by asking the shard itself, via a local peer.
            let observer = Peer {
                role: "observer",
                zone_id: peers[0].instance_id.clone(),
                server_id: peers[0].server_id,
            };
            let status = fetch_shard_status(ctx, &observer).await?;
            self.update_ha_shard(ctx, image, &status).await
        }
    }
}

impl UpdateManatee {
    /// Roll the user-data script: stash the old one, push the new one to
    /// the service record and every peer zone.
    async fn refresh_user_script(
        &self,
        ctx: &ExecContext<'_>,
        change: &NormalizedChange,
        image: &Image,
        peers: &[&Instance],
    ) -> Result<(), ExecError> {
        let Some(headnode) = ctx.inventory.headnode() else {
            return Err(ExecError::Precondition(
                "no headnode in inventory".to_string(),
            ));
        };
        let new_script = ctx
            .exec_checked(
                headnode.uuid,
                "cat /usbkey/default/user-script.common",
            )
            .await?
            .stdout;

        if let Some(old) = self.current_user_script(ctx, change).await? {
            let path = ctx
                .workdir
                .write_artifact("manatee-old-user-script.sh", old.as_bytes())?;
            info!(ctx.log, "saved previous user-script"; "path" => %path);
        }

        let payload = serde_json::json!({
            "set_customer_metadata": { "user-script": &new_script }
        });
        for peer in peers {
            let script = format!(
                "echo '{}' | vmadm update {}",
                payload, peer.instance_id
            );
            ctx.exec_checked(peer.server_id, &script).await?;
        }

        refresh_service_record(ctx, change, image, Some(new_script)).await
    }

    async fn current_user_script(
        &self,
        ctx: &ExecContext<'_>,
        change: &NormalizedChange,
    ) -> Result<Option<String>, ExecError> {
        let services = ctx
            .clients
            .registry
            .list_services(&updateadm_clients::ServiceFilter {
                kind: None,
                name: Some(change.service.name.clone()),
            })
            .await?;
        Ok(services.first().and_then(|s| {
            s.metadata
                .get("user-script")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        }))
    }

    /// The three-peer protocol.  Replicas first, then the primary by way
    /// of promotion.
    async fn update_ha_shard(
        &self,
        ctx: &ExecContext<'_>,
        image: &Image,
        status: &ShardStatus,
    ) -> Result<(), ExecError> {
        if status.mode() != ShardMode::Async {
            return Err(ExecError::Update(UpdateError::HaSetup(format!(
                "shard is in {} mode; full replication (async) is \
                 required before updating",
                status.mode()
            ))));
        }
        // mode() == Async guarantees all three roles are present
        let (Some(p), Some(s), Some(a)) =
            (&status.primary, &status.sync, &status.r#async)
        else {
            return Err(ExecError::Update(UpdateError::HaSetup(
                "shard status did not report all three roles".to_string(),
            )));
        };
        let primary = Peer::resolve(ctx, "primary", p)?;
        let sync = Peer::resolve(ctx, "sync", s)?;
        let r#async = Peer::resolve(ctx, "async", a)?;

        // Async replica first.
        self.disable_peer(ctx, &r#async).await?;
        self.wait_for_shard(ctx, &primary, ShardMode::Sync).await?;
        if r#async.server_id == primary.server_id {
            info!(
                ctx.log,
                "async peer shares the primary's server; \
                 image already installed there"
            );
        } else {
            self.install_image_on_server(ctx, r#async.server_id, image)
                .await?;
        }
        self.reprovision_peer(ctx, &r#async, image).await?;
        tokio::time::sleep(REPROVISION_SETTLE).await;
        self.wait_for_shard(ctx, &primary, ShardMode::Async).await?;

        // Then the sync replica.
        self.disable_peer(ctx, &sync).await?;
        self.wait_for_shard(ctx, &primary, ShardMode::Sync).await?;
        if sync.server_id == primary.server_id
            || sync.server_id == r#async.server_id
        {
            info!(
                ctx.log,
                "sync peer shares a server already carrying the image"
            );
        } else {
            self.install_image_on_server(ctx, sync.server_id, image)
                .await?;
        }
        self.reprovision_peer(ctx, &sync, image).await?;
        tokio::time::sleep(REPROVISION_SETTLE).await;
        self.wait_for_shard(ctx, &primary, ShardMode::Async).await?;

        // Finally the primary: disable it, let the shard promote the
        // upgraded sync peer, and bring the old primary back as a replica.
        self.disable_peer(ctx, &primary).await?;
        self.wait_for_promotion(ctx, &r#async, &primary.zone_id).await?;
        self.reprovision_peer(ctx, &primary, image).await?;
        tokio::time::sleep(REPROVISION_SETTLE).await;
        self.wait_for_shard(ctx, &r#async, ShardMode::Async).await?;

        ctx.note("Shard back at full replication on the new image");
        Ok(())
    }

    /// The single-peer protocol: proto mode around the reprovision.
    async fn update_single_peer(
        &self,
        ctx: &ExecContext<'_>,
        peer: &Instance,
        image: &Image,
    ) -> Result<(), ExecError> {
        // the registry must have exactly one zone here or the proto-mode
        // dance below is operating on the wrong thing
        let sapi_zone = the_one_zone_of(ctx, "sapi")?;

        ensure_image_local(ctx, image).await?;
        self.install_image_on_server(ctx, peer.server_id, image).await?;

        ctx.note(
            "Single-peer shard: switching service registry to proto mode",
        );
        ctx.clients.registry.set_mode(RegistryMode::Proto).await?;
        ctx.exec_checked(
            sapi_zone.server_id,
            &format!("svcadm -z {} restart sapi", sapi_zone.instance_id),
        )
        .await?;

        save_instance_undo(ctx, peer)?;
        let script = format!(
            "echo '{{\"image_uuid\": \"{}\"}}' | vmadm reprovision {}",
            image.uuid, peer.instance_id,
        );
        ctx.note(&format!(
            "Reprovisioning {} (manatee)",
            peer.alias.as_deref().unwrap_or(&peer.instance_id),
        ));
        ctx.exec_checked(peer.server_id, &script).await?;

        tokio::time::sleep(REPROVISION_SETTLE).await;
        self.wait_for_postgres(ctx, peer).await?;

        ctx.note("Restoring service registry to full mode");
        ctx.clients.registry.set_mode(RegistryMode::Full).await?;
        Ok(())
    }

    async fn disable_peer(
        &self,
        ctx: &ExecContext<'_>,
        peer: &Peer,
    ) -> Result<(), ExecError> {
        ctx.note(&format!("Disabling {} peer ({})", peer.role, peer.zone_id));
        let script = PEER_SERVICES
            .iter()
            .map(|svc| {
                format!("svcadm -z {} disable -s {}", peer.zone_id, svc)
            })
            .collect::<Vec<_>>()
            .join(" && ");
        ctx.exec_checked(peer.server_id, &script).await?;
        Ok(())
    }

    /// Server-targeted installs go through the node inventory's command
    /// channel rather than the broadcast fanout transport.
    async fn install_image_on_server(
        &self,
        ctx: &ExecContext<'_>,
        server: Uuid,
        image: &Image,
    ) -> Result<(), ExecError> {
        ctx.note(&format!(
            "Installing image {} on server {}",
            image.uuid, server
        ));
        let result = ctx
            .clients
            .nodes
            .command_execute(server, &format!("imgadm import -q {}", image.uuid))
            .await?;
        if !result.success() {
            return Err(ExecError::RemoteCommand {
                server,
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    async fn reprovision_peer(
        &self,
        ctx: &ExecContext<'_>,
        peer: &Peer,
        image: &Image,
    ) -> Result<(), ExecError> {
        ctx.note(&format!(
            "Reprovisioning {} peer ({})",
            peer.role, peer.zone_id
        ));
        let script = format!(
            "echo '{{\"image_uuid\": \"{}\"}}' | vmadm reprovision {}",
            image.uuid, peer.zone_id,
        );
        ctx.exec_checked(peer.server_id, &script).await?;
        Ok(())
    }

    async fn wait_for_shard(
        &self,
        ctx: &ExecContext<'_>,
        observe_from: &Peer,
        want: ShardMode,
    ) -> Result<(), ExecError> {
        ctx.note(&format!("Waiting for shard to reach {} mode", want));
        let result = poll::wait_for(SHARD_SETTLE, || async {
            match try_fetch_shard_status(ctx, observe_from).await? {
                Some(status) if status.mode() == want => Ok(()),
                _ => Err(CondCheckError::NotYet),
            }
        })
        .await;
        finish_wait(result, format!("shard to reach {} mode", want))
    }

    /// After the primary is disabled, the upgraded sync peer must take
    /// over.  Observed from the former async peer: the disabled primary
    /// can no longer answer, and this also proves the surviving chain
    /// agrees about the new primary.
    async fn wait_for_promotion(
        &self,
        ctx: &ExecContext<'_>,
        observe_from: &Peer,
        old_primary_zone: &str,
    ) -> Result<(), ExecError> {
        ctx.note("Waiting for a new primary to take over");
        let result = poll::wait_for(PROMOTION_SETTLE, || async {
            match try_fetch_shard_status(ctx, observe_from).await? {
                Some(status)
                    if status
                        .primary
                        .as_ref()
                        .map(|p| p.zone_id != old_primary_zone)
                        .unwrap_or(false) =>
                {
                    Ok(())
                }
                _ => Err(CondCheckError::NotYet),
            }
        })
        .await;
        finish_wait(result, "a new primary to take over".to_string())
    }

    async fn wait_for_postgres(
        &self,
        ctx: &ExecContext<'_>,
        peer: &Instance,
    ) -> Result<(), ExecError> {
        ctx.note("Waiting for the database to accept queries");
        let script = format!(
            "zlogin {} 'psql -U postgres -t -c \"SELECT NOW()\"'",
            peer.instance_id,
        );
        let server = peer.server_id;
        let result = poll::wait_for(POSTGRES_SETTLE, || async {
            match ctx.clients.shell.exec_on(server, &script).await {
                Ok(result) if result.success() => Ok(()),
                Ok(_) => Err(CondCheckError::NotYet),
                Err(error) => {
                    Err(CondCheckError::Failed(ExecError::Upstream(error)))
                }
            }
        })
        .await;
        finish_wait(result, "the database to accept queries".to_string())
    }
}

/// Run the status tool in a peer zone; a failure to execute the transport
/// is fatal, but a nonzero exit or unparseable output is not (the peer
/// may be mid-restart), so those surface as `None`.
async fn try_fetch_shard_status(
    ctx: &ExecContext<'_>,
    observe_from: &Peer,
) -> Result<Option<ShardStatus>, CondCheckError<ExecError>> {
    let script = format!(
        "zlogin {} 'source ~/.bashrc; manatee-adm status 2>/dev/null'",
        observe_from.zone_id,
    );
    match ctx.clients.shell.exec_on(observe_from.server_id, &script).await {
        Ok(result) if result.success() => {
            Ok(ShardStatus::parse(result.stdout_trimmed()).ok())
        }
        Ok(_) => Ok(None),
        Err(error) => Err(CondCheckError::Failed(ExecError::Upstream(error))),
    }
}

/// As [`try_fetch_shard_status`], but for the one-shot discovery call
/// where failure to answer is itself an error.
async fn fetch_shard_status(
    ctx: &ExecContext<'_>,
    observe_from: &Peer,
) -> Result<ShardStatus, ExecError> {
    let script = format!(
        "zlogin {} 'source ~/.bashrc; manatee-adm status 2>/dev/null'",
        observe_from.zone_id,
    );
    let result =
        ctx.exec_checked(observe_from.server_id, &script).await?;
    Ok(ShardStatus::parse(result.stdout_trimmed())?)
}

fn finish_wait(
    result: Result<(), PollError<ExecError>>,
    what: String,
) -> Result<(), ExecError> {
    match result {
        Ok(()) => Ok(()),
        Err(PollError::TimedOut { attempts, .. }) => {
            Err(ExecError::Timeout { what, attempts })
        }
        Err(PollError::Permanent(error)) => Err(error),
    }
}
