//! 2-of-3 threshold account core
//!
//! Everything account-lifecycle lives here: deterministic address
//! prediction, the per-account session value, deployment orchestration,
//! background funding, and the spend signature-collection protocol.
//!
//! # Example
//!
//! ```ignore
//! use safekit::safe::{DeploymentOrchestrator, FundingCoordinator, OwnerSet, SafeSession};
//!
//! let owners = OwnerSet::new(owner1.address(), owner2.address(), server.address)?;
//! let mut session = SafeSession::predict(owners, &server, chain_id);
//!
//! let orchestrator = DeploymentOrchestrator::new(chain.clone());
//! orchestrator.deploy(&mut session, &owner1).await?;
//!
//! // Funding runs detached; deployment success was already observed.
//! let funding = FundingCoordinator::new(chain).spawn_auto_fund(&session, owner1);
//! ```

pub mod composer;
pub mod deploy;
pub mod funding;
pub mod predictor;
pub mod session;

pub use composer::{
    ComposerError, SpendSignature, SpendState, SpendTransaction, TransactionComposer,
};
pub use deploy::{DeployConfig, DeployError, DeploymentOrchestrator};
pub use funding::{FundingCoordinator, FundingOutcome, FundingPlan};
pub use predictor::{deployment_calldata, predict_address, setup_initializer};
pub use session::{
    AccountStatus, DeploymentRecord, OwnerSet, OwnerSetError, SafeSession, THRESHOLD,
};
