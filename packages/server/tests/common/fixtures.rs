//! Test fixtures for creating test data.

use sqlx::PgPool;
use uuid::Uuid;

use server_core::domains::audit::Actor;
use server_core::domains::campaigns::{Campaign, CampaignPhase, PhaseStatus};
use server_core::domains::leads::NewGeneratedDomain;
use server_core::domains::leads::store as leads_store;

/// An actor with the full client identity, valid for security-critical
/// audit actions.
pub fn test_actor() -> Actor {
    Actor::with_client(Uuid::new_v4(), "203.0.113.5", "engine-tests/1.0")
}

/// Insert a campaign in the given state.
pub async fn create_campaign(
    pool: &PgPool,
    name: &str,
    phase: CampaignPhase,
    status: PhaseStatus,
) -> Campaign {
    Campaign::builder()
        .name(name.to_string())
        .user_id(Uuid::new_v4())
        .current_phase(phase)
        .phase_status(status)
        .build()
        .insert(pool)
        .await
        .expect("insert campaign")
}

/// Insert a campaign that has not started yet.
pub async fn create_fresh_campaign(pool: &PgPool, name: &str) -> Campaign {
    create_campaign(
        pool,
        name,
        CampaignPhase::DomainGeneration,
        PhaseStatus::NotStarted,
    )
    .await
}

/// Seed `count` generated domains named `d<offset>.example.com`.
pub async fn seed_domains(pool: &PgPool, campaign_id: Uuid, count: i64) -> Vec<NewGeneratedDomain> {
    let domains: Vec<NewGeneratedDomain> = (0..count)
        .map(|offset| NewGeneratedDomain {
            domain_name: format!("d{offset}.example.com"),
            offset_index: offset,
        })
        .collect();
    leads_store::bulk_insert(campaign_id, &domains, pool)
        .await
        .expect("seed domains");
    domains
}
