pub mod currency;
pub mod cycle;
pub mod market;
pub mod order;
pub mod reservation;
pub mod volatility;

pub use currency::Currency;
pub use cycle::{Cycle, CycleRecord, CycleState};
pub use market::{resolve_direction, Market, Side};
pub use order::{OrderRecord, OrderState, OrderType};
pub use reservation::{Reservation, ReservationStatus};
pub use volatility::VolatilityWindow;
