//! Driver registry for board types.
//!
//! Provides a `DriverRegistry` struct mapping each [`BoardModel`] to the
//! factory that builds its [`Board`] implementation. This uses
//! constructor-injection rather than global state.

use daqhat_common::board::{Board, BoardModel};
use daqhat_common::error::{DaqError, DaqResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the board at an address.
pub type BoardFactory = Arc<dyn Fn(u8) -> DaqResult<Box<dyn Board>> + Send + Sync>;

/// Registry of available board drivers.
///
/// Constructed at startup, populated via `register()`, and passed to
/// `BoardRegistry` by value. No global state, testable in isolation.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<BoardModel, BoardFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver for the same model is already registered.
    pub fn register(&mut self, model: BoardModel, factory: BoardFactory) {
        if self.factories.contains_key(&model) {
            panic!("Driver for {model} is already registered");
        }
        self.factories.insert(model, factory);
    }

    /// Get a driver factory by model.
    pub fn get_factory(&self, model: BoardModel) -> Option<BoardFactory> {
        self.factories.get(&model).cloned()
    }

    /// Create the board at `address`.
    ///
    /// # Errors
    /// `InvalidDevice` if no driver handles `model`, or whatever the
    /// factory reports.
    pub fn create_board(&self, model: BoardModel, address: u8) -> DaqResult<Box<dyn Board>> {
        let factory = self.factories.get(&model).ok_or_else(|| DaqError::InvalidDevice {
            address,
            reason: format!("no driver registered for {model}"),
        })?;
        factory(address)
    }

    /// List all registered models, ordered by product ID.
    pub fn list_models(&self) -> Vec<BoardModel> {
        let mut models: Vec<BoardModel> = self.factories.keys().copied().collect();
        models.sort_by_key(|m| m.product_id());
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqhat_common::board::{BoardInfo, ScanSetup, SelectedBus};
    use daqhat_common::types::{Calibration, SourceRole, TriggerMode};

    struct TestBoard(u8);

    impl Board for TestBoard {
        fn info(&self) -> &'static BoardInfo {
            BoardModel::Mcc118.info()
        }

        fn address(&self) -> u8 {
            self.0
        }

        fn calibration(&self, _channel: u8) -> Calibration {
            Calibration::default()
        }

        fn set_calibration(&mut self, _channel: u8, _calibration: Calibration) {}

        fn configure_scan(&mut self, _bus: &mut dyn SelectedBus, _setup: &ScanSetup) -> DaqResult<()> {
            Ok(())
        }

        fn read_raw_sample(&mut self, _bus: &mut dyn SelectedBus, _channel: u8) -> DaqResult<i32> {
            Ok(2048)
        }

        fn end_scan(&mut self, _bus: &mut dyn SelectedBus) -> DaqResult<()> {
            Ok(())
        }

        fn set_input_range(&mut self, _bus: &mut dyn SelectedBus, _index: usize) -> DaqResult<()> {
            Ok(())
        }

        fn write_clock_config(
            &mut self,
            _bus: &mut dyn SelectedBus,
            _role: SourceRole,
            _rate: f64,
        ) -> DaqResult<()> {
            Ok(())
        }

        fn read_sync_status(&mut self, _bus: &mut dyn SelectedBus) -> DaqResult<bool> {
            Ok(true)
        }

        fn write_trigger_config(
            &mut self,
            _bus: &mut dyn SelectedBus,
            _role: SourceRole,
            _mode: TriggerMode,
        ) -> DaqResult<()> {
            Ok(())
        }

        fn read_trigger_input(&mut self, _bus: &mut dyn SelectedBus) -> DaqResult<bool> {
            Ok(false)
        }
    }

    fn test_factory() -> BoardFactory {
        Arc::new(|address: u8| -> DaqResult<Box<dyn Board>> { Ok(Box::new(TestBoard(address))) })
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = DriverRegistry::new();
        reg.register(BoardModel::Mcc118, test_factory());

        let board = reg.create_board(BoardModel::Mcc118, 3).expect("should create");
        assert_eq!(board.address(), 3);
        assert_eq!(board.channel_count(), 8);
        assert_eq!(board.code_range(), (0, 4095));
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        let result = reg.create_board(BoardModel::Mcc172, 0);
        assert!(matches!(result, Err(DaqError::InvalidDevice { address: 0, .. })));
        assert!(reg.get_factory(BoardModel::Mcc172).is_none());
    }

    #[test]
    fn registry_list_models() {
        let mut reg = DriverRegistry::new();
        reg.register(BoardModel::Mcc128, test_factory());
        reg.register(BoardModel::Mcc118, test_factory());

        assert_eq!(
            reg.list_models(),
            vec![BoardModel::Mcc118, BoardModel::Mcc128]
        );
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register(BoardModel::Mcc118, test_factory());
        reg.register(BoardModel::Mcc118, test_factory());
    }
}
