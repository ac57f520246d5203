//! Shared application state.

use checkout::{
    CheckoutCoordinator, InMemoryBookingProvider, InMemoryCartService, InMemoryNotifier,
    InMemoryPaymentGateway, InMemoryReservationService,
};
use local_store::LocalStore;

use crate::config::Config;

/// Coordinator wired to the in-memory external services.
pub type Coordinator<S> = CheckoutCoordinator<
    InMemoryCartService,
    InMemoryPaymentGateway,
    InMemoryBookingProvider,
    InMemoryBookingProvider,
    InMemoryReservationService,
    S,
    InMemoryNotifier,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LocalStore> {
    pub coordinator: Coordinator<S>,
    pub gateway: InMemoryPaymentGateway,
    pub flights: InMemoryBookingProvider,
    pub hotels: InMemoryBookingProvider,
    pub reservations: InMemoryReservationService,
    pub notifier: InMemoryNotifier,
    pub config: Config,
}

impl<S: LocalStore + Clone> AppState<S> {
    /// Builds the state around `store`, with in-memory external services.
    pub fn new(store: S, config: Config) -> Self {
        let cart_service = InMemoryCartService::new();
        let gateway = InMemoryPaymentGateway::new(config.bank_gateway_url.clone());
        let flights = InMemoryBookingProvider::flights();
        let hotels = InMemoryBookingProvider::hotels();
        let reservations = InMemoryReservationService::new();
        let notifier = InMemoryNotifier::new();

        let coordinator = CheckoutCoordinator::new(
            cart_service,
            gateway.clone(),
            flights.clone(),
            hotels.clone(),
            reservations.clone(),
            notifier.clone(),
            store,
        );

        Self {
            coordinator,
            gateway,
            flights,
            hotels,
            reservations,
            notifier,
            config,
        }
    }
}
