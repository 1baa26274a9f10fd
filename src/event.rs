use crate::dgtz::{CaenApi, DecodedEvent, ErrorCode, EventInfo, EventSlice, ReadoutBuffer};

/// The readout buffer of a session plus what the last readout put in it.
///
/// The vendor memory is released when this is dropped.
pub struct RawData<B> {
    buffer: B,
    data_size: u32,
    num_events: u32,
}

impl<B: ReadoutBuffer> RawData<B> {
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            data_size: 0,
            num_events: 0,
        }
    }

    /// Size in bytes granted by the vendor allocator.
    pub fn capacity(&self) -> u32 {
        self.buffer.capacity()
    }

    /// Bytes written by the last readout.
    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    pub fn num_events(&self) -> u32 {
        self.num_events
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub(crate) fn set_data_size(&mut self, size: u32) {
        self.data_size = size;
    }

    pub(crate) fn set_num_events(&mut self, events: u32) {
        self.num_events = events;
    }

    pub(crate) fn clear_counts(&mut self) {
        self.data_size = 0;
        self.num_events = 0;
    }
}

/// One slot of the event pool: a vendor decode target and the info of the
/// event last decoded into it.
pub struct Event<E> {
    decoded: E,
    info: EventInfo,
}

impl<E: DecodedEvent> Event<E> {
    pub fn new(decoded: E) -> Self {
        Self {
            decoded,
            info: EventInfo::default(),
        }
    }

    pub fn info(&self) -> &EventInfo {
        &self.info
    }

    pub fn data(&self) -> &E {
        &self.decoded
    }

    /// Finds event `index` inside `raw` and stores its info.
    ///
    /// The returned slice is only valid for `raw` as it is now.
    pub(crate) fn locate<A>(
        &mut self,
        api: &mut A,
        handle: i32,
        raw: &RawData<A::Buffer>,
        index: u32,
    ) -> Result<EventSlice, ErrorCode>
    where
        A: CaenApi<Event = E>,
    {
        let (info, slice) = api.get_event_info(handle, raw.buffer(), raw.data_size(), index)?;
        self.info = info;
        Ok(slice)
    }

    pub(crate) fn decode<A>(
        &mut self,
        api: &mut A,
        handle: i32,
        raw: &RawData<A::Buffer>,
        slice: EventSlice,
    ) -> Result<(), ErrorCode>
    where
        A: CaenApi<Event = E>,
    {
        api.decode_event(handle, raw.buffer(), slice, &mut self.decoded)
    }
}
