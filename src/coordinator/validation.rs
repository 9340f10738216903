use crate::prelude::*;

/// Confirms something PI30-shaped answers on the link by sending one QPIGS.
/// Any `(`-prefixed reply counts, a NAK included: the device is there.
pub fn validate_connection(link: &dyn Exchange) -> Result<(), Error> {
    let response = link.exchange(Command::Qpigs);

    if response.is_frame() {
        info!("{}: inverter answered {}", link.port(), Command::Qpigs);
        Ok(())
    } else {
        Err(Error::CannotConnect {
            port: link.port().to_owned(),
            response: response.as_str().to_owned(),
        })
    }
}
