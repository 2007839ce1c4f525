use uuid::Uuid;

use crate::device::types::{CharacteristicHandle, PeripheralHandle, ServiceHandle};
use crate::error::DeviceError;

/// The command side of a BLE radio.
///
/// Every method returns immediately. The outcome of an accepted command arrives later as a
/// [`RadioEvent`](crate::device::types::RadioEvent) on the channel the adapter was created with.
/// An `Err` means the adapter refused the command outright and no event will follow.
pub trait RadioAdapter {
    fn set_ready(&mut self) -> Result<(), DeviceError>;

    fn scan(&mut self, service_filter: Uuid) -> Result<(), DeviceError>;

    fn stop_scan(&mut self) -> Result<(), DeviceError>;

    fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError>;

    fn cancel_connection(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError>;

    fn discover_services(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError>;

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralHandle,
        service: &ServiceHandle,
    ) -> Result<(), DeviceError>;

    /// Writes with response, so the completion event reflects the peripheral's answer.
    fn write(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), DeviceError>;

    fn set_notify(
        &mut self,
        peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), DeviceError>;
}
