//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! Records live in in-memory stores that are hydrated from Postgres at
//! startup and written through on every mutation when a pool is configured.
//! Locks are `parking_lot` and are never held across `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use greentrace_core::{AccessLogger, AuditError, Product, RoleRegistry, UserProfile, WalletAddress};
use greentrace_state::CarbonCredit;

use crate::audit_log::DbAuditSink;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::metrics::ApiMetrics;

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Atomically read-validate-update a record.
    ///
    /// Returns `None` if the record doesn't exist, or `Some(result)` with
    /// the closure's `Result`.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Profiles -----------------------------------------------------------------

/// Per-wallet lock serializing first-time provisioning.
type ProvisioningSlot = Arc<tokio::sync::Mutex<()>>;

/// Profiles keyed by id, with a unique wallet index.
///
/// A profile is published here only after it has been persisted, so any
/// id read from the directory refers to a committed row.
#[derive(Debug, Clone, Default)]
pub struct ProfileDirectory {
    profiles: Store<UserProfile>,
    by_wallet: Arc<Mutex<HashMap<WalletAddress, Uuid>>>,
    provisioning: Arc<Mutex<HashMap<WalletAddress, ProvisioningSlot>>>,
}

impl ProfileDirectory {
    /// Insert `profile` unless its wallet already has one.
    ///
    /// Returns the wallet's profile and whether `profile` was inserted.
    pub fn publish(&self, profile: UserProfile) -> (UserProfile, bool) {
        let mut index = self.by_wallet.lock();
        if let Some(existing) = index
            .get(&profile.wallet_address)
            .and_then(|id| self.profiles.get(id))
        {
            return (existing, false);
        }
        index.insert(profile.wallet_address.clone(), profile.id);
        self.profiles.insert(profile.id, profile.clone());
        (profile, true)
    }

    pub fn find_by_wallet(&self, wallet: &WalletAddress) -> Option<UserProfile> {
        let id = self.by_wallet.lock().get(wallet).copied()?;
        self.profiles.get(&id)
    }

    pub fn get(&self, id: &Uuid) -> Option<UserProfile> {
        self.profiles.get(id)
    }

    pub fn list(&self) -> Vec<UserProfile> {
        self.profiles.list()
    }

    /// Apply `f` to a copy of profile `id` without committing it.
    ///
    /// Returns the current record, the modified copy, and `f`'s output.
    pub fn stage_update<R>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut UserProfile) -> Result<R, AppError>,
    ) -> Result<(UserProfile, UserProfile, R), AppError> {
        let previous = self
            .profiles
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("profile {id} not found")))?;
        let mut next = previous.clone();
        let out = f(&mut next)?;
        Ok((previous, next, out))
    }

    /// Commit a staged update if the stored profile is still `expected`.
    pub fn commit_update(&self, expected: &UserProfile, next: UserProfile) -> Result<(), AppError> {
        let id = expected.id;
        self.profiles
            .try_update(&id, |current| {
                if current.updated_at != expected.updated_at {
                    return Err(AppError::Conflict(format!(
                        "profile {id} was modified concurrently"
                    )));
                }
                *current = next;
                Ok(())
            })
            .ok_or_else(|| AppError::NotFound(format!("profile {id} not found")))?
    }

    /// Load a persisted profile during startup hydration.
    pub fn restore(&self, profile: UserProfile) {
        self.by_wallet
            .lock()
            .insert(profile.wallet_address.clone(), profile.id);
        self.profiles.insert(profile.id, profile);
    }

    /// The provisioning lock for `wallet`, shared by every caller racing on it.
    fn provisioning_slot(&self, wallet: &WalletAddress) -> ProvisioningSlot {
        Arc::clone(self.provisioning.lock().entry(wallet.clone()).or_default())
    }

    /// Give back `slot`, dropping the lock entry once nobody else holds it.
    fn release_slot(&self, wallet: &WalletAddress, slot: ProvisioningSlot) {
        let mut slots = self.provisioning.lock();
        drop(slot);
        if slots.get(wallet).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(wallet);
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// -- Products -----------------------------------------------------------------

/// Products keyed by id, with a unique batch-id index.
///
/// Writers persist first and then commit here, conditional on the record's
/// `updated_at` being the one they started from.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    products: Store<Product>,
    by_batch: Arc<Mutex<HashMap<String, Uuid>>>,
}

fn duplicate_batch(batch_id: &str) -> AppError {
    AppError::Conflict(format!("batch_id '{batch_id}' already exists"))
}

fn product_not_found(id: &Uuid) -> AppError {
    AppError::NotFound(format!("product {id} not found"))
}

fn product_conflict(id: &Uuid) -> AppError {
    AppError::Conflict(format!("product {id} was modified concurrently"))
}

impl ProductCatalog {
    /// Insert a new product. Fails with 409 if the batch id is taken.
    pub fn insert(&self, product: Product) -> Result<(), AppError> {
        let mut index = self.by_batch.lock();
        if index.contains_key(&product.batch_id) {
            return Err(duplicate_batch(&product.batch_id));
        }
        index.insert(product.batch_id.clone(), product.id);
        self.products.insert(product.id, product);
        Ok(())
    }

    /// Whether another product already uses `batch_id`.
    pub fn batch_taken(&self, batch_id: &str) -> bool {
        self.by_batch.lock().contains_key(batch_id)
    }

    pub fn get(&self, id: &Uuid) -> Option<Product> {
        self.products.get(id)
    }

    pub fn list(&self) -> Vec<Product> {
        self.products.list()
    }

    /// Apply `f` to a copy of product `id` without committing it.
    ///
    /// Returns the current record, the modified copy, and `f`'s output.
    /// Fails with 409 if the copy takes a batch id already in use.
    pub fn stage_update<R>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Product) -> Result<R, AppError>,
    ) -> Result<(Product, Product, R), AppError> {
        let previous = self.products.get(id).ok_or_else(|| product_not_found(id))?;
        let mut next = previous.clone();
        let out = f(&mut next)?;
        if next.batch_id != previous.batch_id && self.batch_taken(&next.batch_id) {
            return Err(duplicate_batch(&next.batch_id));
        }
        Ok((previous, next, out))
    }

    /// Commit a staged update if the stored product is still `expected`.
    pub fn commit_update(&self, expected: &Product, next: Product) -> Result<(), AppError> {
        let mut index = self.by_batch.lock();
        let current = self
            .products
            .get(&expected.id)
            .ok_or_else(|| product_not_found(&expected.id))?;
        if current.updated_at != expected.updated_at {
            return Err(product_conflict(&expected.id));
        }
        if next.batch_id != current.batch_id {
            if index.contains_key(&next.batch_id) {
                return Err(duplicate_batch(&next.batch_id));
            }
            index.remove(&current.batch_id);
            index.insert(next.batch_id.clone(), next.id);
        }
        self.products.insert(next.id, next);
        Ok(())
    }

    /// Remove the product if the stored record is still `expected`.
    pub fn remove_if_unchanged(&self, expected: &Product) -> Result<(), AppError> {
        let mut index = self.by_batch.lock();
        let current = self
            .products
            .get(&expected.id)
            .ok_or_else(|| product_not_found(&expected.id))?;
        if current.updated_at != expected.updated_at {
            return Err(product_conflict(&expected.id));
        }
        self.products.remove(&expected.id);
        index.remove(&current.batch_id);
        Ok(())
    }

    /// Load a persisted product during startup hydration.
    pub fn restore(&self, product: Product) {
        let mut index = self.by_batch.lock();
        index.insert(product.batch_id.clone(), product.id);
        self.products.insert(product.id, product);
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

// -- Application State --------------------------------------------------------

/// Errors loading persisted state at startup.
#[derive(Error, Debug)]
pub enum HydrationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    AccessLog(#[from] AuditError),
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<RoleRegistry>,
    pub products: ProductCatalog,
    pub credits: Store<CarbonCredit>,
    pub profiles: ProfileDirectory,
    pub access_log: AccessLogger,
    pub metrics: ApiMetrics,
    /// Postgres pool. `None` means in-memory only.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// In-memory state with default configuration and role table.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), RoleRegistry::default(), None)
    }

    pub fn with_config(config: AppConfig, registry: RoleRegistry, db_pool: Option<PgPool>) -> Self {
        let mut access_log = AccessLogger::new();
        if let Some(pool) = &db_pool {
            access_log = access_log.with_sink(Arc::new(DbAuditSink::new(pool.clone())));
        }
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            products: ProductCatalog::default(),
            credits: Store::new(),
            profiles: ProfileDirectory::default(),
            access_log,
            metrics: ApiMetrics::new(),
            db_pool,
        }
    }

    /// Return the profile for `wallet`, provisioning and persisting it on
    /// first sight. The flag is `true` when the profile was just created.
    pub async fn provision_profile(
        &self,
        wallet: &WalletAddress,
        network: Option<&str>,
    ) -> Result<(UserProfile, bool), AppError> {
        let pool = self.db_pool.clone();
        self.provision_with(wallet, network, |profile| async move {
            let Some(pool) = pool else {
                return Ok(());
            };
            crate::db::profiles::insert(&pool, &profile)
                .await
                .map_err(|e| {
                    tracing::error!(profile_id = %profile.id, error = %e, "failed to persist profile");
                    AppError::Internal("profile could not be persisted".to_string())
                })
        })
        .await
    }

    /// Provisioning with the persistence step supplied by the caller.
    ///
    /// First-time provisioning of one wallet runs under that wallet's slot,
    /// and the profile is published only after `persist` succeeds.
    pub(crate) async fn provision_with<F, Fut>(
        &self,
        wallet: &WalletAddress,
        network: Option<&str>,
        persist: F,
    ) -> Result<(UserProfile, bool), AppError>
    where
        F: FnOnce(UserProfile) -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        if let Some(existing) = self.profiles.find_by_wallet(wallet) {
            return Ok((existing, false));
        }

        let slot = self.profiles.provisioning_slot(wallet);
        let result: Result<(UserProfile, bool), AppError> = async {
            let _guard = slot.lock().await;
            if let Some(existing) = self.profiles.find_by_wallet(wallet) {
                return Ok((existing, false));
            }

            let role = if self.config.is_admin_wallet(wallet) {
                greentrace_core::Role::Admin
            } else {
                greentrace_core::Role::Public
            };
            let network = network.or(Some(self.config.default_network.as_str()));
            let profile = UserProfile::provision(wallet.clone(), role, network)?;
            persist(profile.clone()).await?;

            let (profile, created) = self.profiles.publish(profile);
            if created {
                tracing::info!(profile_id = %profile.id, wallet = %wallet, role = %role, "provisioned profile");
            }
            Ok((profile, created))
        }
        .await;

        self.profiles.release_slot(wallet, slot);
        result
    }

    /// Load every record from the database into the in-memory stores.
    ///
    /// Must run before the service accepts requests: the access log only
    /// accepts persisted entries while it is still empty.
    pub async fn hydrate_from_db(&self) -> Result<(), HydrationError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };

        let profiles = crate::db::profiles::load_all(pool).await?;
        let profile_count = profiles.len();
        for profile in profiles {
            self.profiles.restore(profile);
        }

        let products = crate::db::products::load_all(pool).await?;
        let product_count = products.len();
        for product in products {
            self.products.restore(product);
        }

        let credits = crate::db::credits::load_all(pool).await?;
        let credit_count = credits.len();
        for credit in credits {
            self.credits.insert(credit.id, credit);
        }

        let entries = crate::db::access_log::load_all(pool).await?;
        let entry_count = entries.len();
        self.access_log.restore(entries)?;
        let integrity = self.access_log.verify_chain();
        if !integrity.chain_valid {
            tracing::error!(
                broken_links = integrity.broken_links,
                first_broken_sequence = ?integrity.first_broken_sequence,
                "access log hash chain is broken"
            );
        }

        tracing::info!(
            profiles = profile_count,
            products = product_count,
            credits = credit_count,
            access_log_entries = entry_count,
            "Hydrated in-memory stores from database"
        );
        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greentrace_core::{NewProduct, ProductPatch, ProfileUpdate, Role};

    fn wallet(s: &str) -> WalletAddress {
        WalletAddress::parse(s).unwrap()
    }

    fn product(batch: &str) -> Product {
        Product::create(
            NewProduct {
                name: "Tea".into(),
                batch_id: batch.into(),
                ..Default::default()
            },
            Uuid::new_v4(),
        )
        .unwrap()
    }

    #[test]
    fn store_insert_get_remove() {
        let store: Store<String> = Store::new();
        let id = Uuid::new_v4();
        assert!(store.insert(id, "a".into()).is_none());
        assert_eq!(store.get(&id).as_deref(), Some("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove(&id).as_deref(), Some("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn store_try_update_missing_is_none() {
        let store: Store<u32> = Store::new();
        assert!(store
            .try_update(&Uuid::new_v4(), |v| Ok::<_, ()>(*v += 1))
            .is_none());
    }

    fn profile(w: &WalletAddress) -> UserProfile {
        UserProfile::provision(w.clone(), Role::Public, None).unwrap()
    }

    #[test]
    fn publish_is_idempotent_per_wallet() {
        let dir = ProfileDirectory::default();
        let w = wallet("0xAA");
        let (first, created) = dir.publish(profile(&w));
        assert!(created);
        let (second, created) = dir.publish(profile(&w));
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn stale_profile_commit_is_conflict() {
        let dir = ProfileDirectory::default();
        let w = wallet("0x0a");
        let (stored, _) = dir.publish(profile(&w));

        let (prev_a, next_a, _) = dir
            .stage_update(&stored.id, |p| {
                p.apply(ProfileUpdate {
                    organization: Some("First".into()),
                    ..Default::default()
                })
                .map_err(AppError::from)
            })
            .unwrap();
        let (prev_b, next_b, _) = dir
            .stage_update(&stored.id, |p| {
                p.apply(ProfileUpdate {
                    organization: Some("Second".into()),
                    ..Default::default()
                })
                .map_err(AppError::from)
            })
            .unwrap();

        dir.commit_update(&prev_a, next_a).unwrap();
        let err = dir.commit_update(&prev_b, next_b).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            Some(dir.get(&stored.id).unwrap().organization.as_str()),
            Some("First")
        );
    }

    #[tokio::test]
    async fn profile_hidden_until_persisted() {
        let state = AppState::new();
        let w = wallet("0x5eed");
        let (profile, created) = state
            .provision_with(&w, None, |p| {
                let dir = state.profiles.clone();
                let wallet = w.clone();
                async move {
                    assert!(dir.find_by_wallet(&wallet).is_none());
                    assert!(dir.get(&p.id).is_none());
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert!(created);
        assert_eq!(state.profiles.find_by_wallet(&w).unwrap().id, profile.id);
    }

    #[tokio::test]
    async fn failed_persist_publishes_nothing() {
        let state = AppState::new();
        let w = wallet("0xfa11");
        let err = state
            .provision_with(&w, None, |_| async {
                Err(AppError::Internal("database unavailable".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(state.profiles.find_by_wallet(&w).is_none());
        assert!(state.profiles.is_empty());

        let (_, created) = state.provision_profile(&w, None).await.unwrap();
        assert!(created);
        assert_eq!(state.profiles.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_provisioning_creates_one_profile() {
        let state = AppState::new();
        let w = wallet("0xbeef");
        let persisted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                let w = w.clone();
                let persisted = Arc::clone(&persisted);
                tokio::spawn(async move {
                    state
                        .provision_with(&w, None, |_| async move {
                            persisted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(())
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        let mut created = 0;
        for task in tasks {
            let (profile, was_created) = task.await.unwrap();
            ids.push(profile.id);
            created += usize::from(was_created);
        }
        assert_eq!(created, 1);
        assert_eq!(persisted.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(state.profiles.len(), 1);
        assert!(state.profiles.provisioning.lock().is_empty());
    }

    #[test]
    fn duplicate_batch_rejected() {
        let catalog = ProductCatalog::default();
        catalog.insert(product("B-1")).unwrap();
        let err = catalog.insert(product("B-1")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn batch_rename_checks_uniqueness() {
        let catalog = ProductCatalog::default();
        let a = product("A");
        let a_id = a.id;
        catalog.insert(a).unwrap();
        catalog.insert(product("B")).unwrap();

        let err = catalog
            .stage_update(&a_id, |p| {
                p.batch_id = "B".into();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let (previous, next, ()) = catalog
            .stage_update(&a_id, |p| {
                p.batch_id = "C".into();
                Ok(())
            })
            .unwrap();
        assert_eq!(catalog.get(&a_id).unwrap().batch_id, "A");
        catalog.commit_update(&previous, next).unwrap();
        catalog.insert(product("A")).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn stale_product_commit_keeps_first_write() {
        let catalog = ProductCatalog::default();
        let p = product("S-1");
        let id = p.id;
        catalog.insert(p).unwrap();

        let rename = |name: &'static str| {
            move |p: &mut Product| {
                p.apply(ProductPatch {
                    name: Some(name.into()),
                    ..Default::default()
                })
                .map_err(AppError::from)
            }
        };
        let (prev_a, next_a, _) = catalog.stage_update(&id, rename("First")).unwrap();
        let (prev_b, next_b, _) = catalog.stage_update(&id, rename("Second")).unwrap();

        catalog.commit_update(&prev_a, next_a).unwrap();
        let err = catalog.commit_update(&prev_b, next_b).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(catalog.get(&id).unwrap().name, "First");
    }

    #[test]
    fn stale_delete_is_conflict() {
        let catalog = ProductCatalog::default();
        let p = product("D-1");
        let id = p.id;
        catalog.insert(p).unwrap();
        let snapshot = catalog.get(&id).unwrap();

        let (previous, next, _) = catalog
            .stage_update(&id, |p| {
                p.apply(ProductPatch {
                    name: Some("Renamed".into()),
                    ..Default::default()
                })
                .map_err(AppError::from)
            })
            .unwrap();
        catalog.commit_update(&previous, next).unwrap();

        let err = catalog.remove_if_unchanged(&snapshot).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(catalog.get(&id).unwrap().name, "Renamed");
    }

    #[test]
    fn remove_frees_batch_id() {
        let catalog = ProductCatalog::default();
        let p = product("X");
        catalog.insert(p.clone()).unwrap();
        catalog.remove_if_unchanged(&p).unwrap();
        assert!(catalog.is_empty());
        catalog.insert(product("X")).unwrap();
    }

    #[tokio::test]
    async fn provision_profile_honours_admin_wallets() {
        let config = AppConfig {
            admin_wallets: vec![wallet("0xad")],
            ..Default::default()
        };
        let state = AppState::with_config(config, RoleRegistry::default(), None);
        let (admin, created) = state.provision_profile(&wallet("0xAD"), None).await.unwrap();
        assert!(created);
        assert_eq!(admin.role, Role::Admin);
        let (user, _) = state.provision_profile(&wallet("0xuser"), None).await.unwrap();
        assert_eq!(user.role, Role::Public);
    }
}
