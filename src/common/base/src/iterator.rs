pub trait TryIterator {
    type Item;
    type Error;

    fn try_next(&mut self) -> Result<Option<Self::Item>, Self::Error>;
}

#[async_trait]
pub trait AsyncIterator {
    type Item;
    type Error;

    async fn try_next(&mut self) -> Result<Option<Self::Item>, Self::Error>;
}

/// AsyncIterators concatenates a list of AsyncIterator into a single stream,
/// draining each one in order.
pub struct AsyncIterators<ITR>
where
    ITR: AsyncIterator + Send,
{
    itrs: Vec<ITR>,
    i: usize,
}

impl<ITR> AsyncIterators<ITR>
where
    ITR: AsyncIterator + Send,
{
    pub fn new(itrs: Vec<ITR>) -> Self {
        Self { itrs, i: 0 }
    }
}

#[async_trait]
impl<ITR> AsyncIterator for AsyncIterators<ITR>
where
    ITR: AsyncIterator + Send,
    ITR::Item: Send,
    ITR::Error: Send,
{
    type Item = ITR::Item;
    type Error = ITR::Error;

    async fn try_next(&mut self) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.i >= self.itrs.len() {
                return Ok(None);
            }

            let itr = &mut self.itrs[self.i];
            if let Some(v) = itr.try_next().await? {
                return Ok(Some(v));
            }

            self.i += 1;
        }
    }
}
